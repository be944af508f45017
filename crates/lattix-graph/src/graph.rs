use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use lattix_core::error::{LattixError, Result};
use lattix_core::types::{Edge, EdgeId, Node, NodeId, NodeKind, WorkflowId};

/// In-memory DAG of one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow_id: WorkflowId,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Build a graph from stored rows, checking edge structure as it goes.
    pub fn from_parts(workflow_id: WorkflowId, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut graph = Self::new(workflow_id);
        for node in nodes {
            graph.add_node(node)?;
        }
        for edge in edges {
            // Structure only; acyclicity is checked once at the end so a
            // stored graph loads in one pass.
            graph.check_edge(&edge)?;
            graph.edges.push(edge);
        }
        graph.topological_order()?;
        Ok(graph)
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add a node. Nodes never create cycles, so only identity is checked.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.workflow_id != self.workflow_id {
            return Err(LattixError::DagValidation(format!(
                "node {} belongs to workflow {}, not {}",
                node.id, node.workflow_id, self.workflow_id
            )));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(LattixError::DagValidation(format!(
                "duplicate node {}",
                node.id
            )));
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or(LattixError::NodeNotFound(id))?;
        self.edges
            .retain(|e| e.source_node_id != id && e.target_node_id != id);
        Ok(node)
    }

    /// Add an edge, re-validating acyclicity. A rejected edge leaves the
    /// graph untouched.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.check_edge(&edge)?;
        self.edges.push(edge);
        if let Err(e) = self.topological_order() {
            self.edges.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge> {
        let pos = self
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or(LattixError::EdgeNotFound(id))?;
        Ok(self.edges.remove(pos))
    }

    /// Structural checks for one edge: same workflow, both endpoints
    /// present, no self-loop.
    fn check_edge(&self, edge: &Edge) -> Result<()> {
        if edge.workflow_id != self.workflow_id {
            return Err(LattixError::DagValidation(format!(
                "edge {} belongs to workflow {}, not {}",
                edge.id, edge.workflow_id, self.workflow_id
            )));
        }
        if edge.source_node_id == edge.target_node_id {
            return Err(LattixError::DagValidation(format!(
                "self-loop on node {} is a cycle",
                edge.source_node_id
            )));
        }
        for endpoint in [edge.source_node_id, edge.target_node_id] {
            if !self.nodes.contains_key(&endpoint) {
                return Err(LattixError::DagValidation(format!(
                    "edge {} references missing node {}",
                    edge.id, endpoint
                )));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm with a deterministic tie-break.
    ///
    /// Simultaneously-ready nodes are ordered by ascending position hint,
    /// then ascending node id, so identical graphs always schedule
    /// identically. Fails when nodes remain after the ready set drains,
    /// naming a node stuck on the cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(&edge.target_node_id) {
                *d += 1;
            }
            successors
                .entry(edge.source_node_id)
                .or_default()
                .push(edge.target_node_id);
        }

        let mut ready: BinaryHeap<Reverse<(i32, NodeId)>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse((self.position_of(*id), *id)))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            if let Some(next) = successors.get(&id) {
                for &target in next {
                    if let Some(d) = in_degree.get_mut(&target) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(Reverse((self.position_of(target), target)));
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // Whatever is left sits on or behind a cycle; name the smallest
            // id for a stable message.
            let stuck = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .min();
            return Err(match stuck {
                Some(id) => LattixError::DagValidation(format!(
                    "cycle detected involving node {} ('{}')",
                    id,
                    self.node_name(id)
                )),
                None => LattixError::DagValidation(format!(
                    "cycle detected: ordered {} of {} nodes",
                    order.len(),
                    self.nodes.len()
                )),
            });
        }

        debug!(workflow_id = %self.workflow_id, nodes = order.len(), "topological order computed");
        Ok(order)
    }

    /// Full pre-flight for a run: exactly one start node, at least one end
    /// node, an agent reference on every agent node, acyclic. Returns the
    /// execution order.
    pub fn validate_for_execution(&self) -> Result<Vec<NodeId>> {
        let starts = self
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        if starts != 1 {
            return Err(LattixError::DagValidation(format!(
                "workflow must contain exactly one start node, found {}",
                starts
            )));
        }
        if !self.nodes.values().any(|n| n.kind == NodeKind::End) {
            return Err(LattixError::DagValidation(
                "workflow must contain at least one end node".to_string(),
            ));
        }
        for node in self.nodes.values() {
            if node.kind == NodeKind::Agent && node.agent_id.is_none() {
                return Err(LattixError::DagValidation(format!(
                    "agent node {} ('{}') has no agent reference",
                    node.id, node.name
                )));
            }
        }
        self.topological_order()
    }

    fn position_of(&self, id: NodeId) -> i32 {
        self.nodes.get(&id).map(|n| n.position).unwrap_or(0)
    }

    fn node_name(&self, id: NodeId) -> &str {
        self.nodes.get(&id).map(|n| n.name.as_str()).unwrap_or("?")
    }
}
