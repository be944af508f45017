use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use lattix_core::config::EngineConfig;
use lattix_core::context::{ContextSnapshot, SharedContext};
use lattix_core::error::{LattixError, Result};
use lattix_core::event::{EngineEvent, EventBus};
use lattix_core::traits::{AgentInvoker, DelegationHandle, ExecutionStore};
use lattix_core::types::{
    AgentId, AgentProfile, AgentReply, ExecutionStatus, NewLogEntry, Node, NodeKind,
};

use crate::delegation::{DelegationContext, InvocationBudget};
use crate::queue::RunJob;

/// Outcome of one node visit.
struct NodeOutcome {
    output: Value,
    agent_id: Option<AgentId>,
    delegations: usize,
}

impl NodeOutcome {
    fn plain(output: Value) -> Self {
        Self {
            output,
            agent_id: None,
            delegations: 0,
        }
    }
}

/// Walks one execution's nodes in topological order.
///
/// Nodes within a run are strictly sequential; each node's log row is
/// written before the next node starts, so the trail is complete up to the
/// point a run halts. Failures finalize the execution and never retry.
pub struct NodeRunner {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    invoker: Arc<dyn AgentInvoker>,
    bus: Arc<EventBus>,
}

impl NodeRunner {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ExecutionStore>,
        invoker: Arc<dyn AgentInvoker>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            invoker,
            bus,
        }
    }

    /// Drive one run job to a terminal status.
    pub async fn run(&self, job: RunJob) {
        let execution_id = job.execution_id;

        if let Err(e) = self
            .store
            .update_execution_status(execution_id, ExecutionStatus::Running, None, None)
            .await
        {
            error!(execution_id = %execution_id, error = %e, "could not mark execution running");
            return;
        }
        self.bus
            .publish(EngineEvent::ExecutionStarted { execution_id });
        info!(
            execution_id = %execution_id,
            workflow_id = %job.graph.workflow_id(),
            "execution started"
        );

        match self.walk(&job).await {
            Ok(final_output) => {
                if let Err(e) = self
                    .store
                    .update_execution_status(
                        execution_id,
                        ExecutionStatus::Completed,
                        Some(final_output),
                        None,
                    )
                    .await
                {
                    error!(execution_id = %execution_id, error = %e, "could not finalize execution");
                    return;
                }
                self.bus
                    .publish(EngineEvent::ExecutionCompleted { execution_id });
                info!(execution_id = %execution_id, "execution completed");
            }
            Err(e) => {
                let message = e.to_string();
                warn!(execution_id = %execution_id, error = %message, "execution failed");
                if let Err(e) = self
                    .store
                    .update_execution_status(
                        execution_id,
                        ExecutionStatus::Failed,
                        None,
                        Some(message.clone()),
                    )
                    .await
                {
                    error!(execution_id = %execution_id, error = %e, "could not finalize execution");
                }
                self.bus.publish(EngineEvent::ExecutionFailed {
                    execution_id,
                    error: message,
                });
            }
        }
    }

    /// Visit every node; returns the run's final output.
    async fn walk(&self, job: &RunJob) -> Result<Value> {
        let execution_id = job.execution_id;
        let order = job.graph.validate_for_execution()?;
        let budget = (self.config.max_invocations > 0)
            .then(|| Arc::new(InvocationBudget::new(self.config.max_invocations)));

        let mut context = SharedContext::seeded(job.initial_input.clone());
        let mut final_output: Option<Value> = None;

        for node_id in order {
            let node = job
                .graph
                .node(node_id)
                .ok_or(LattixError::NodeNotFound(node_id))?;

            self.bus.publish(EngineEvent::NodeStarted {
                execution_id,
                node_id,
                kind: node.kind,
            });
            info!(
                execution_id = %execution_id,
                node_id = %node_id,
                node_name = %node.name,
                kind = %node.kind,
                "visiting node"
            );

            // The log row keeps the state the node saw, not where the run
            // moved on to.
            let input_snapshot = context.snapshot().to_value();

            let outcome = match node.kind {
                NodeKind::Start => Ok(NodeOutcome::plain(job.initial_input.clone())),
                NodeKind::Agent => self.run_agent_node(node, &context, &budget).await,
                NodeKind::Condition => {
                    // Inert in v1: forwards the last output unchanged.
                    let passed = context.last_output().cloned().unwrap_or(Value::Null);
                    Ok(NodeOutcome::plain(passed))
                }
                NodeKind::End => {
                    let output = end_output(&context);
                    final_output = Some(output.clone());
                    Ok(NodeOutcome::plain(output))
                }
            };

            match outcome {
                Ok(outcome) => {
                    self.store
                        .append_log(NewLogEntry {
                            execution_id,
                            node_id,
                            agent_id: outcome.agent_id,
                            input: input_snapshot,
                            output: Some(outcome.output.clone()),
                            error_message: None,
                            delegated: outcome.delegations > 0,
                        })
                        .await?;
                    context.record_node_output(node_id, outcome.output);
                    self.bus.publish(EngineEvent::NodeCompleted {
                        execution_id,
                        node_id,
                        delegations: outcome.delegations,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(
                        execution_id = %execution_id,
                        node_id = %node_id,
                        node_name = %node.name,
                        error = %message,
                        "node failed, halting"
                    );
                    self.store
                        .append_log(NewLogEntry {
                            execution_id,
                            node_id,
                            agent_id: node.agent_id,
                            input: input_snapshot,
                            output: None,
                            error_message: Some(message.clone()),
                            delegated: false,
                        })
                        .await?;
                    self.bus.publish(EngineEvent::NodeFailed {
                        execution_id,
                        node_id,
                        error: message.clone(),
                    });
                    return Err(LattixError::NodeExecution {
                        node: node_id,
                        name: node.name.clone(),
                        message,
                    });
                }
            }
        }

        // Pre-flight guarantees an end node, so this fallback only covers
        // a graph mutated after validation.
        Ok(final_output.unwrap_or_else(|| end_output(&context)))
    }

    async fn run_agent_node(
        &self,
        node: &Node,
        context: &SharedContext,
        budget: &Option<Arc<InvocationBudget>>,
    ) -> Result<NodeOutcome> {
        let agent_id = node.agent_id.ok_or_else(|| {
            LattixError::DagValidation(format!(
                "agent node {} ('{}') has no agent reference",
                node.id, node.name
            ))
        })?;
        let profile = self
            .store
            .get_agent(agent_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or(LattixError::AgentNotFound(agent_id))?;

        if let Some(budget) = budget {
            budget.try_acquire()?;
        }

        let task = derive_task(context);
        let visible = self.store.list_agents(true).await?;
        let snapshot = context.snapshot();
        let delegation = Arc::new(DelegationContext::root(
            agent_id,
            self.config.max_delegation_depth,
            visible,
            snapshot.clone(),
            self.invoker.clone(),
            self.bus.clone(),
            budget.clone(),
        ));
        let handle: Arc<dyn DelegationHandle> = delegation.clone();

        let reply = invoke_with_timeout(
            self.invoker.as_ref(),
            self.config.invoke_timeout_secs,
            profile.clone(),
            task.clone(),
            snapshot,
            handle,
        )
        .await?;

        let delegations = delegation.events().await;
        let mut output = json!({
            "agent_id": agent_id.0,
            "agent_name": profile.name,
            "task": task,
            "response": reply.text,
        });
        if let Some(structured) = reply.structured {
            output["structured"] = structured;
        }
        if !delegations.is_empty() {
            output["delegations"] = serde_json::to_value(&delegations)?;
        }

        Ok(NodeOutcome {
            output,
            agent_id: Some(agent_id),
            delegations: delegations.len(),
        })
    }
}

/// Await the invoker under the configured per-invocation timeout.
///
/// The timeout spans the whole invocation tree: nested delegations run
/// inside the awaited future, so they share the caller's clock.
pub(crate) async fn invoke_with_timeout(
    invoker: &dyn AgentInvoker,
    timeout_secs: u64,
    agent: AgentProfile,
    task: String,
    context: ContextSnapshot,
    delegation: Arc<dyn DelegationHandle>,
) -> Result<AgentReply> {
    let agent_name = agent.name.clone();
    let fut = invoker.invoke(agent, task, context, delegation);
    if timeout_secs == 0 {
        return fut.await;
    }
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(reply) => reply,
        Err(_) => Err(LattixError::AgentInvocation {
            agent: agent_name,
            message: format!("timed out after {}s", timeout_secs),
        }),
    }
}

/// Task text for the next agent, derived from the threaded context.
///
/// Textual sources win over serialization: the previous node's `response`
/// field, the last output when it is a plain string, then the initial
/// input's `message` field. Only when nothing textual exists does the
/// structured value itself become the task, serialized compact.
fn derive_task(context: &SharedContext) -> String {
    if let Some(last) = context.last_output() {
        if let Some(response) = last.get("response").and_then(Value::as_str) {
            return response.to_string();
        }
        if let Some(text) = last.as_str() {
            return text.to_string();
        }
    }
    if let Some(input) = context.initial_input() {
        if let Some(message) = input.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(text) = input.as_str() {
            return text.to_string();
        }
    }
    if let Some(last) = context.last_output() {
        return last.to_string();
    }
    context
        .initial_input()
        .map(|input| input.to_string())
        .unwrap_or_default()
}

/// The shape an end node produces and a completed run records.
fn end_output(context: &SharedContext) -> Value {
    json!({
        "final_result": context.last_output().cloned().unwrap_or(Value::Null),
        "full_context": context.to_value(),
    })
}
