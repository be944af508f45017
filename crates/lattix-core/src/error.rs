use thiserror::Error;

use crate::types::{AgentId, EdgeId, ExecutionId, ExecutionStatus, NodeId, WorkflowId};

#[derive(Debug, Error)]
pub enum LattixError {
    // Graph errors
    #[error("DAG validation failed: {0}")]
    DagValidation(String),

    // Agent errors
    #[error("Agent {0} not found or inactive")]
    AgentNotFound(AgentId),

    #[error("Agent invocation failed: {agent}: {message}")]
    AgentInvocation { agent: String, message: String },

    #[error("Maximum delegation depth ({max}) exceeded at depth {depth}")]
    DelegationDepthExceeded { depth: usize, max: usize },

    #[error("Invocation budget exhausted after {0} agent calls")]
    InvocationBudgetExceeded(usize),

    // Lookup errors
    #[error("Workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    #[error("Workflow {0} is inactive")]
    WorkflowInactive(WorkflowId),

    #[error("Execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    // Execution state errors
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    // Engine errors
    #[error("Node {node} ('{name}') failed: {message}")]
    NodeExecution {
        node: NodeId,
        name: String,
        message: String,
    },

    #[error("Run queue unavailable: {0}")]
    Queue(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Ambient conversions
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LattixError>;
