use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use lattix_core::context::ContextSnapshot;
use lattix_core::error::{LattixError, Result};
use lattix_core::event::{EngineEvent, EventBus};
use lattix_core::traits::{AgentInvoker, DelegationHandle};
use lattix_core::types::{AgentId, AgentProfile, AgentReply, DelegationEvent};

/// Shared cap on agent invocations within one run, nodes plus delegations.
pub struct InvocationBudget {
    limit: usize,
    used: AtomicUsize,
}

impl InvocationBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Charge one invocation against the budget.
    pub fn try_acquire(&self) -> Result<()> {
        let used = self.used.fetch_add(1, Ordering::SeqCst);
        if used >= self.limit {
            return Err(LattixError::InvocationBudgetExceeded(self.limit));
        }
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

/// Runtime delegation capability handed to an invoked agent.
///
/// One invocation tree (a node run or a direct invocation) shares a single
/// event chain and budget across all nesting levels; each hop gets a child
/// context one level deeper. The depth guard fails closed before the target
/// agent is looked at, and a failed hop never touches the chain.
pub struct DelegationContext {
    delegator: AgentId,
    depth: usize,
    max_depth: usize,
    agents: HashMap<AgentId, AgentProfile>,
    context: ContextSnapshot,
    invoker: Arc<dyn AgentInvoker>,
    bus: Arc<EventBus>,
    chain: Arc<Mutex<Vec<DelegationEvent>>>,
    budget: Option<Arc<InvocationBudget>>,
}

impl DelegationContext {
    /// Depth-0 context for a top-level invocation.
    pub fn root(
        delegator: AgentId,
        max_depth: usize,
        visible: Vec<AgentProfile>,
        context: ContextSnapshot,
        invoker: Arc<dyn AgentInvoker>,
        bus: Arc<EventBus>,
        budget: Option<Arc<InvocationBudget>>,
    ) -> Self {
        let agents = visible
            .into_iter()
            .filter(|a| a.is_active)
            .map(|a| (a.id, a))
            .collect();
        Self {
            delegator,
            depth: 0,
            max_depth,
            agents,
            context,
            invoker,
            bus,
            chain: Arc::new(Mutex::new(Vec::new())),
            budget,
        }
    }

    /// Context for a delegate: one level deeper, same chain and budget.
    fn child(&self, delegator: AgentId) -> Self {
        Self {
            delegator,
            depth: self.depth + 1,
            max_depth: self.max_depth,
            agents: self.agents.clone(),
            context: self.context.clone(),
            invoker: self.invoker.clone(),
            bus: self.bus.clone(),
            chain: self.chain.clone(),
            budget: self.budget.clone(),
        }
    }

    /// Every delegation recorded under this invocation tree, in order.
    pub async fn events(&self) -> Vec<DelegationEvent> {
        self.chain.lock().await.clone()
    }

    pub async fn delegation_count(&self) -> usize {
        self.chain.lock().await.len()
    }
}

impl DelegationHandle for DelegationContext {
    fn delegate(&self, target: AgentId, task: String) -> BoxFuture<'_, Result<AgentReply>> {
        Box::pin(async move {
            let next_depth = self.depth + 1;
            if next_depth > self.max_depth {
                return Err(LattixError::DelegationDepthExceeded {
                    depth: next_depth,
                    max: self.max_depth,
                });
            }

            let profile = self
                .agents
                .get(&target)
                .cloned()
                .ok_or(LattixError::AgentNotFound(target))?;

            if let Some(budget) = &self.budget {
                budget.try_acquire()?;
            }

            debug!(
                delegator = %self.delegator,
                delegate = %target,
                delegate_name = %profile.name,
                depth = next_depth,
                "delegating task"
            );

            let handle: Arc<dyn DelegationHandle> = Arc::new(self.child(target));
            let reply = self
                .invoker
                .invoke(profile.clone(), task.clone(), self.context.clone(), handle)
                .await?;

            self.chain.lock().await.push(DelegationEvent {
                delegator_id: self.delegator,
                delegate_id: target,
                delegate_name: profile.name,
                task,
                response: reply.text.clone(),
                depth: next_depth,
                timestamp: Utc::now(),
            });
            self.bus.publish(EngineEvent::Delegated {
                delegator_id: self.delegator,
                delegate_id: target,
                depth: next_depth,
            });

            Ok(reply)
        })
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn visible_agents(&self) -> Vec<AgentProfile> {
        let mut agents: Vec<AgentProfile> = self.agents.values().cloned().collect();
        agents.sort_by_key(|a| a.id);
        agents
    }
}
