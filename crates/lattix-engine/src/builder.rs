use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use lattix_core::error::{LattixError, Result};
use lattix_core::traits::ExecutionStore;
use lattix_core::types::{
    AgentId, Edge, EdgeId, NewEdge, NewNode, Node, NodeId, NodeKind, Workflow, WorkflowId,
};
use lattix_graph::WorkflowGraph;

/// Validated editing of stored workflows.
///
/// Every mutation loads the current graph, applies the change through the
/// validating graph API, and only persists when that succeeds. A rejected
/// change leaves both the in-memory graph and the store untouched.
pub struct WorkflowBuilder {
    store: Arc<dyn ExecutionStore>,
}

impl WorkflowBuilder {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    pub async fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workflow> {
        let workflow = self.store.create_workflow(name, description).await?;
        info!(workflow_id = %workflow.id, name = %name, "workflow created");
        Ok(workflow)
    }

    /// Add a node. Agent nodes must reference an existing active agent.
    pub async fn add_node(
        &self,
        workflow_id: WorkflowId,
        kind: NodeKind,
        agent_id: Option<AgentId>,
        name: &str,
        config: Option<Value>,
        position: i32,
    ) -> Result<Node> {
        self.require_workflow(workflow_id).await?;

        if kind == NodeKind::Agent {
            let agent_id = agent_id.ok_or_else(|| {
                LattixError::DagValidation(format!(
                    "agent node '{}' needs an agent reference",
                    name
                ))
            })?;
            self.store
                .get_agent(agent_id)
                .await?
                .filter(|a| a.is_active)
                .ok_or(LattixError::AgentNotFound(agent_id))?;
        }

        let node = self
            .store
            .insert_node(NewNode {
                workflow_id,
                kind,
                agent_id,
                name: name.to_string(),
                config,
                position,
            })
            .await?;
        debug!(workflow_id = %workflow_id, node_id = %node.id, kind = %kind, "node added");
        Ok(node)
    }

    /// Add an edge, rejecting anything that would break the DAG.
    pub async fn add_edge(
        &self,
        workflow_id: WorkflowId,
        source: NodeId,
        target: NodeId,
        condition: Option<String>,
        label: Option<String>,
    ) -> Result<Edge> {
        let mut graph = self.load(workflow_id).await?;

        // Tentative apply; the store assigns the real id on success.
        graph.add_edge(Edge {
            id: EdgeId(0),
            workflow_id,
            source_node_id: source,
            target_node_id: target,
            condition: condition.clone(),
            label: label.clone(),
        })?;

        let edge = self
            .store
            .insert_edge(NewEdge {
                workflow_id,
                source_node_id: source,
                target_node_id: target,
                condition,
                label,
            })
            .await?;
        debug!(
            workflow_id = %workflow_id,
            edge_id = %edge.id,
            source = %source,
            target = %target,
            "edge added"
        );
        Ok(edge)
    }

    /// Remove a node and its incident edges.
    pub async fn remove_node(&self, workflow_id: WorkflowId, node_id: NodeId) -> Result<()> {
        let mut graph = self.load(workflow_id).await?;
        // Validates the node belongs to this workflow.
        graph.remove_node(node_id)?;
        self.store.remove_node(node_id).await?;
        debug!(workflow_id = %workflow_id, node_id = %node_id, "node removed");
        Ok(())
    }

    pub async fn remove_edge(&self, workflow_id: WorkflowId, edge_id: EdgeId) -> Result<()> {
        let mut graph = self.load(workflow_id).await?;
        graph.remove_edge(edge_id)?;
        self.store.remove_edge(edge_id).await?;
        debug!(workflow_id = %workflow_id, edge_id = %edge_id, "edge removed");
        Ok(())
    }

    /// Retire a workflow from execution without losing its history.
    pub async fn deactivate_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        self.store.deactivate_workflow(workflow_id).await?;
        info!(workflow_id = %workflow_id, "workflow deactivated");
        Ok(())
    }

    /// Delete a workflow and everything it owns.
    pub async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        self.store.delete_workflow(workflow_id).await?;
        info!(workflow_id = %workflow_id, "workflow deleted");
        Ok(())
    }

    /// The workflow's current graph.
    pub async fn load(&self, workflow_id: WorkflowId) -> Result<WorkflowGraph> {
        self.require_workflow(workflow_id).await?;
        let (nodes, edges) = self.store.load_graph(workflow_id).await?;
        WorkflowGraph::from_parts(workflow_id, nodes, edges)
    }

    /// Run the execution pre-flight and return the node order it would use.
    pub async fn execution_order(&self, workflow_id: WorkflowId) -> Result<Vec<NodeId>> {
        self.load(workflow_id).await?.validate_for_execution()
    }

    async fn require_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or(LattixError::WorkflowNotFound(workflow_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_core::types::NewAgent;
    use lattix_store::SqliteStore;
    use serde_json::json;

    async fn builder() -> (WorkflowBuilder, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (WorkflowBuilder::new(store.clone()), store)
    }

    async fn seed_agent(store: &SqliteStore) -> AgentId {
        store
            .create_agent(NewAgent {
                name: "worker".into(),
                system_prompt: "Work.".into(),
                model_id: "demo".into(),
                temperature: 0.7,
                max_retries: 0,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_build_linear_workflow() {
        let (builder, store) = builder().await;
        let agent_id = seed_agent(&store).await;

        let wf = builder.create_workflow("pipeline", None).await.unwrap();
        let start = builder
            .add_node(wf.id, NodeKind::Start, None, "start", None, 0)
            .await
            .unwrap();
        let work = builder
            .add_node(wf.id, NodeKind::Agent, Some(agent_id), "work", None, 1)
            .await
            .unwrap();
        let end = builder
            .add_node(wf.id, NodeKind::End, None, "end", None, 2)
            .await
            .unwrap();
        builder
            .add_edge(wf.id, start.id, work.id, None, None)
            .await
            .unwrap();
        builder
            .add_edge(wf.id, work.id, end.id, None, None)
            .await
            .unwrap();

        let order = builder.execution_order(wf.id).await.unwrap();
        assert_eq!(order, vec![start.id, work.id, end.id]);
    }

    #[tokio::test]
    async fn test_cycle_edge_rejected_and_not_persisted() {
        let (builder, _store) = builder().await;
        let wf = builder.create_workflow("cyclic", None).await.unwrap();
        let a = builder
            .add_node(wf.id, NodeKind::Start, None, "a", None, 0)
            .await
            .unwrap();
        let b = builder
            .add_node(wf.id, NodeKind::End, None, "b", None, 1)
            .await
            .unwrap();
        builder.add_edge(wf.id, a.id, b.id, None, None).await.unwrap();

        let err = builder
            .add_edge(wf.id, b.id, a.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LattixError::DagValidation(_)));

        // Reload shows the pre-mutation graph.
        let graph = builder.load(wf.id).await.unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let (builder, _store) = builder().await;
        let wf = builder.create_workflow("loopy", None).await.unwrap();
        let a = builder
            .add_node(wf.id, NodeKind::Start, None, "a", None, 0)
            .await
            .unwrap();

        let err = builder
            .add_edge(wf.id, a.id, a.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LattixError::DagValidation(_)));
        assert_eq!(builder.load(wf.id).await.unwrap().edge_count(), 0);
    }

    #[tokio::test]
    async fn test_agent_node_requires_known_active_agent() {
        let (builder, store) = builder().await;
        let wf = builder.create_workflow("strict", None).await.unwrap();

        let err = builder
            .add_node(wf.id, NodeKind::Agent, Some(AgentId(99)), "ghost", None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LattixError::AgentNotFound(AgentId(99))));

        let err = builder
            .add_node(wf.id, NodeKind::Agent, None, "unbound", None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LattixError::DagValidation(_)));

        let agent_id = seed_agent(&store).await;
        store.deactivate_agent(agent_id).await.unwrap();
        let err = builder
            .add_node(wf.id, NodeKind::Agent, Some(agent_id), "retired", None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LattixError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_node_drops_incident_edges() {
        let (builder, _store) = builder().await;
        let wf = builder.create_workflow("trim", None).await.unwrap();
        let a = builder
            .add_node(wf.id, NodeKind::Start, None, "a", None, 0)
            .await
            .unwrap();
        let b = builder
            .add_node(wf.id, NodeKind::Condition, None, "b", None, 1)
            .await
            .unwrap();
        let c = builder
            .add_node(wf.id, NodeKind::End, None, "c", None, 2)
            .await
            .unwrap();
        builder.add_edge(wf.id, a.id, b.id, None, None).await.unwrap();
        builder.add_edge(wf.id, b.id, c.id, None, None).await.unwrap();

        builder.remove_node(wf.id, b.id).await.unwrap();

        let graph = builder.load(wf.id).await.unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_node_from_wrong_workflow() {
        let (builder, _store) = builder().await;
        let wf1 = builder.create_workflow("one", None).await.unwrap();
        let wf2 = builder.create_workflow("two", None).await.unwrap();
        let node = builder
            .add_node(wf1.id, NodeKind::Start, None, "a", None, 0)
            .await
            .unwrap();

        let err = builder.remove_node(wf2.id, node.id).await.unwrap_err();
        assert!(matches!(err, LattixError::NodeNotFound(_)));

        // Still present in its own workflow.
        assert_eq!(builder.load(wf1.id).await.unwrap().node_count(), 1);
    }

    #[tokio::test]
    async fn test_edge_condition_and_label_stored_verbatim() {
        let (builder, _store) = builder().await;
        let wf = builder.create_workflow("annotated", None).await.unwrap();
        let a = builder
            .add_node(wf.id, NodeKind::Start, None, "a", None, 0)
            .await
            .unwrap();
        let b = builder
            .add_node(wf.id, NodeKind::End, None, "b", Some(json!({"x": 1})), 1)
            .await
            .unwrap();

        let edge = builder
            .add_edge(
                wf.id,
                a.id,
                b.id,
                Some("score > 3".into()),
                Some("maybe".into()),
            )
            .await
            .unwrap();

        let graph = builder.load(wf.id).await.unwrap();
        let stored = graph.edges().iter().find(|e| e.id == edge.id).unwrap();
        assert_eq!(stored.condition.as_deref(), Some("score > 3"));
        assert_eq!(stored.label.as_deref(), Some("maybe"));
    }
}
