use tokio::sync::broadcast;

use crate::types::{AgentId, ExecutionId, NodeId, NodeKind, WorkflowId};

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Run job accepted onto the queue.
    ExecutionQueued {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
    },
    /// A worker picked the job up and marked the execution running.
    ExecutionStarted { execution_id: ExecutionId },
    /// Node visit started.
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        kind: NodeKind,
    },
    /// Node visit finished; `delegations` counts runtime hops it made.
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        delegations: usize,
    },
    /// Node visit failed; the execution halts here.
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
    },
    /// A running agent delegated to another agent.
    Delegated {
        delegator_id: AgentId,
        delegate_id: AgentId,
        depth: usize,
    },
    /// Execution reached the end of its topological order.
    ExecutionCompleted { execution_id: ExecutionId },
    /// Execution finalized as failed.
    ExecutionFailed {
        execution_id: ExecutionId,
        error: String,
    },
}

/// Fan-out of engine progress events; every subscriber sees every event.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Best-effort send; an event with no subscribers is dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
