use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::ContextSnapshot;
use crate::error::Result;
use crate::types::*;

/// Runtime delegation capability handed to a running agent.
///
/// Implemented by the engine crate; defined here so [`AgentInvoker`] can
/// name it without a circular dependency.
pub trait DelegationHandle: Send + Sync + 'static {
    /// Invoke another agent mid-run. Fails closed past the depth limit.
    fn delegate(&self, target: AgentId, task: String) -> BoxFuture<'_, Result<AgentReply>>;

    /// Nesting level of the invocation this handle belongs to.
    fn depth(&self) -> usize;

    /// Upper bound on nesting.
    fn max_depth(&self) -> usize;

    /// Agents this handle may delegate to.
    fn visible_agents(&self) -> Vec<AgentProfile>;
}

/// Agent backend — turns a task into a reply.
///
/// The engine resolves the profile, derives the task, and enforces the
/// invocation timeout; implementations only produce the reply, delegating
/// through the handle when they need another agent.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke(
        &self,
        agent: AgentProfile,
        task: String,
        context: ContextSnapshot,
        delegation: Arc<dyn DelegationHandle>,
    ) -> BoxFuture<'_, Result<AgentReply>>;
}

/// Persistence backend for workflows, agents, executions, and logs.
///
/// Every write is durable once the returned future resolves; the engine
/// awaits each write before moving to the next node.
pub trait ExecutionStore: Send + Sync + 'static {
    // Workflows
    fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> BoxFuture<'_, Result<Workflow>>;

    fn get_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<Option<Workflow>>>;

    fn list_workflows(&self, include_inactive: bool) -> BoxFuture<'_, Result<Vec<Workflow>>>;

    /// Soft delete: clears the active flag, keeps all rows.
    fn deactivate_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<()>>;

    /// Hard delete: cascades to nodes, edges, executions, and logs.
    fn delete_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<()>>;

    // Graph
    fn insert_node(&self, node: NewNode) -> BoxFuture<'_, Result<Node>>;

    /// Removes the node and its incident edges.
    fn remove_node(&self, id: NodeId) -> BoxFuture<'_, Result<()>>;

    fn insert_edge(&self, edge: NewEdge) -> BoxFuture<'_, Result<Edge>>;

    fn remove_edge(&self, id: EdgeId) -> BoxFuture<'_, Result<()>>;

    /// Nodes and edges of one workflow.
    fn load_graph(&self, workflow_id: WorkflowId)
        -> BoxFuture<'_, Result<(Vec<Node>, Vec<Edge>)>>;

    // Agents
    fn create_agent(&self, agent: NewAgent) -> BoxFuture<'_, Result<AgentProfile>>;

    fn get_agent(&self, id: AgentId) -> BoxFuture<'_, Result<Option<AgentProfile>>>;

    fn list_agents(&self, active_only: bool) -> BoxFuture<'_, Result<Vec<AgentProfile>>>;

    fn deactivate_agent(&self, id: AgentId) -> BoxFuture<'_, Result<()>>;

    // Executions
    fn create_execution(
        &self,
        workflow_id: WorkflowId,
        initial_input: Value,
    ) -> BoxFuture<'_, Result<Execution>>;

    fn get_execution(&self, id: ExecutionId) -> BoxFuture<'_, Result<Option<Execution>>>;

    /// Rejects transitions out of a terminal status.
    fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        final_output: Option<Value>,
        error_message: Option<String>,
    ) -> BoxFuture<'_, Result<()>>;

    // Logs
    fn append_log(&self, entry: NewLogEntry) -> BoxFuture<'_, Result<ExecutionLog>>;

    /// All log rows of one execution, oldest first.
    fn list_logs(&self, execution_id: ExecutionId) -> BoxFuture<'_, Result<Vec<ExecutionLog>>>;
}
