use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lattix_core::config::EngineConfig;
use lattix_core::context::SharedContext;
use lattix_core::error::{LattixError, Result};
use lattix_core::event::{EngineEvent, EventBus};
use lattix_core::traits::{AgentInvoker, DelegationHandle, ExecutionStore};
use lattix_core::types::{
    AgentId, CorrelationId, DirectReply, Execution, ExecutionId, ExecutionLog, ExecutionStatus,
    WorkflowId,
};
use lattix_graph::WorkflowGraph;

use crate::delegation::{DelegationContext, InvocationBudget};
use crate::queue::{RunJob, RunQueue, WorkerPool};
use crate::runner::{invoke_with_timeout, NodeRunner};

/// The engine's public face: accepts runs, answers status queries, and
/// invokes agents directly.
///
/// `start_execution` returns as soon as the run is validated and queued;
/// traversal happens on the worker pool. Construction spawns the workers,
/// so an `Orchestrator` must be created inside a tokio runtime.
pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    invoker: Arc<dyn AgentInvoker>,
    bus: Arc<EventBus>,
    queue: RunQueue,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ExecutionStore>,
        invoker: Arc<dyn AgentInvoker>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (queue, rx) = RunQueue::new(config.queue_capacity);
        let runner = Arc::new(NodeRunner::new(
            config.clone(),
            store.clone(),
            invoker.clone(),
            bus.clone(),
        ));
        let pool = WorkerPool::spawn(config.workers, rx, runner, CancellationToken::new());
        info!(workers = config.workers, queue_capacity = config.queue_capacity, "orchestrator up");

        Self {
            config,
            store,
            invoker,
            bus,
            queue,
            pool,
        }
    }

    /// Start a run of the given workflow.
    ///
    /// The returned id is valid either way: a workflow that fails
    /// pre-flight validation gets an execution finalized as failed, with
    /// the validation error as its message and no node visits.
    pub async fn start_execution(
        &self,
        workflow_id: WorkflowId,
        initial_input: Value,
    ) -> Result<ExecutionId> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(LattixError::WorkflowNotFound(workflow_id))?;
        if !workflow.is_active {
            return Err(LattixError::WorkflowInactive(workflow_id));
        }

        let (nodes, edges) = self.store.load_graph(workflow_id).await?;
        let execution = self
            .store
            .create_execution(workflow_id, initial_input.clone())
            .await?;

        let preflight = WorkflowGraph::from_parts(workflow_id, nodes, edges)
            .and_then(|graph| graph.validate_for_execution().map(|_| graph));
        let graph = match preflight {
            Ok(graph) => graph,
            Err(e) => {
                let message = e.to_string();
                warn!(
                    workflow_id = %workflow_id,
                    execution_id = %execution.id,
                    error = %message,
                    "pre-flight validation failed"
                );
                self.store
                    .update_execution_status(
                        execution.id,
                        ExecutionStatus::Failed,
                        None,
                        Some(message.clone()),
                    )
                    .await?;
                self.bus.publish(EngineEvent::ExecutionFailed {
                    execution_id: execution.id,
                    error: message,
                });
                return Ok(execution.id);
            }
        };

        // Published before the push so subscribers always see the queued
        // event ahead of anything a worker emits for this run.
        self.bus.publish(EngineEvent::ExecutionQueued {
            execution_id: execution.id,
            workflow_id,
        });
        self.queue
            .push(RunJob {
                execution_id: execution.id,
                graph,
                initial_input,
            })
            .await?;
        info!(workflow_id = %workflow_id, execution_id = %execution.id, "execution queued");
        Ok(execution.id)
    }

    pub async fn execution_status(&self, id: ExecutionId) -> Result<Execution> {
        self.store
            .get_execution(id)
            .await?
            .ok_or(LattixError::ExecutionNotFound(id))
    }

    /// Node visit trail of one execution, oldest first.
    pub async fn execution_logs(&self, id: ExecutionId) -> Result<Vec<ExecutionLog>> {
        self.store
            .get_execution(id)
            .await?
            .ok_or(LattixError::ExecutionNotFound(id))?;
        self.store.list_logs(id).await
    }

    /// Invoke an agent outside any workflow, with delegation available.
    ///
    /// Nothing is persisted; the reply carries the delegation chain and a
    /// correlation id for log greps.
    pub async fn invoke_agent(
        &self,
        agent_id: AgentId,
        task: impl Into<String>,
    ) -> Result<DirectReply> {
        let task = task.into();
        let correlation_id = CorrelationId::new();

        let profile = self
            .store
            .get_agent(agent_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or(LattixError::AgentNotFound(agent_id))?;

        let budget = (self.config.max_invocations > 0)
            .then(|| Arc::new(InvocationBudget::new(self.config.max_invocations)));
        if let Some(budget) = &budget {
            budget.try_acquire()?;
        }

        let visible = self.store.list_agents(true).await?;
        let context = SharedContext::new().snapshot();
        let delegation = Arc::new(DelegationContext::root(
            agent_id,
            self.config.max_delegation_depth,
            visible,
            context.clone(),
            self.invoker.clone(),
            self.bus.clone(),
            budget,
        ));
        let handle: Arc<dyn DelegationHandle> = delegation.clone();

        info!(
            correlation_id = %correlation_id,
            agent_id = %agent_id,
            agent_name = %profile.name,
            "direct agent invocation"
        );
        let reply = invoke_with_timeout(
            self.invoker.as_ref(),
            self.config.invoke_timeout_secs,
            profile.clone(),
            task,
            context,
            handle,
        )
        .await?;

        Ok(DirectReply {
            correlation_id,
            agent_id,
            agent_name: profile.name,
            reply,
            delegations: delegation.events().await,
        })
    }

    /// Live feed of engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Stop the worker pool. Jobs still queued stay pending; the job in
    /// hand finishes first.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        info!("orchestrator stopped");
    }
}
