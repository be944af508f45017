use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use lattix_core::traits::ExecutionStore;
use lattix_core::types::{AgentProfile, NewAgent, Node, NodeId, NodeKind, Workflow};
use lattix_engine::WorkflowBuilder;

/// A workflow definition file: one workflow with its agents, nodes, and
/// edges, all referenced by name.
#[derive(Debug, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowSection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub system_prompt: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_retries: u32,
}

fn default_model_id() -> String {
    "demo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub kind: NodeKind,
    /// Agent name; required when kind is `agent`.
    #[serde(default)]
    pub agent: Option<String>,
    /// Defaults to the node's position in the file.
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EdgeDef {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// A definition materialized into a store, with name lookups kept around.
#[derive(Debug)]
pub struct Seeded {
    pub workflow: Workflow,
    pub agents: HashMap<String, AgentProfile>,
    pub nodes: HashMap<String, Node>,
}

impl Seeded {
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes
            .values()
            .find(|n| n.id == id)
            .map(|n| n.name.as_str())
    }
}

/// Parse a workflow definition file.
pub fn load(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read workflow file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("could not parse workflow file {}", path.display()))
}

/// Create the defined workflow, agents, nodes, and edges in the store.
///
/// Everything goes through the validating builder, so a definition with a
/// cycle or a dangling reference fails here, before anything runs.
pub async fn seed(
    definition: &WorkflowDefinition,
    store: Arc<dyn ExecutionStore>,
) -> Result<Seeded> {
    let builder = WorkflowBuilder::new(store.clone());
    let workflow = builder
        .create_workflow(
            &definition.workflow.name,
            definition.workflow.description.as_deref(),
        )
        .await?;

    let mut agents = HashMap::new();
    for def in &definition.agents {
        if agents.contains_key(&def.name) {
            bail!("duplicate agent name '{}'", def.name);
        }
        let agent = store
            .create_agent(NewAgent {
                name: def.name.clone(),
                system_prompt: def.system_prompt.clone(),
                model_id: def.model_id.clone(),
                temperature: def.temperature,
                max_retries: def.max_retries,
            })
            .await?;
        agents.insert(def.name.clone(), agent);
    }

    let mut nodes = HashMap::new();
    for (index, def) in definition.nodes.iter().enumerate() {
        if nodes.contains_key(&def.name) {
            bail!("duplicate node name '{}'", def.name);
        }
        let agent_id = match (def.kind, &def.agent) {
            (NodeKind::Agent, Some(agent_name)) => Some(
                agents
                    .get(agent_name)
                    .with_context(|| {
                        format!(
                            "node '{}' references undefined agent '{}'",
                            def.name, agent_name
                        )
                    })?
                    .id,
            ),
            (NodeKind::Agent, None) => {
                bail!("agent node '{}' needs an agent reference", def.name)
            }
            _ => None,
        };
        let position = def.position.unwrap_or(index as i32);
        let node = builder
            .add_node(
                workflow.id,
                def.kind,
                agent_id,
                &def.name,
                def.config.clone(),
                position,
            )
            .await?;
        nodes.insert(def.name.clone(), node);
    }

    for def in &definition.edges {
        let source = nodes
            .get(&def.source)
            .with_context(|| format!("edge references undefined node '{}'", def.source))?;
        let target = nodes
            .get(&def.target)
            .with_context(|| format!("edge references undefined node '{}'", def.target))?;
        builder
            .add_edge(
                workflow.id,
                source.id,
                target.id,
                def.condition.clone(),
                def.label.clone(),
            )
            .await?;
    }

    Ok(Seeded {
        workflow,
        agents,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_store::SqliteStore;

    const PIPELINE: &str = r#"
[workflow]
name = "research-pipeline"
description = "Research then summarize"

[[agents]]
name = "researcher"
system_prompt = "You research topics."
model_id = "demo-large"
temperature = 0.3

[[agents]]
name = "writer"
system_prompt = "You write summaries."

[[nodes]]
name = "start"
kind = "start"

[[nodes]]
name = "research"
kind = "agent"
agent = "researcher"

[[nodes]]
name = "write"
kind = "agent"
agent = "writer"
config = { style = "brief" }

[[nodes]]
name = "done"
kind = "end"

[[edges]]
source = "start"
target = "research"

[[edges]]
source = "research"
target = "write"
label = "draft"

[[edges]]
source = "write"
target = "done"
"#;

    fn parse(s: &str) -> WorkflowDefinition {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_full_definition() {
        let def = parse(PIPELINE);
        assert_eq!(def.workflow.name, "research-pipeline");
        assert_eq!(def.agents.len(), 2);
        assert_eq!(def.agents[0].model_id, "demo-large");
        assert_eq!(def.agents[1].model_id, "demo");
        assert_eq!(def.nodes.len(), 4);
        assert_eq!(def.nodes[1].kind, NodeKind::Agent);
        assert_eq!(def.nodes[2].config.as_ref().unwrap()["style"], "brief");
        assert_eq!(def.edges.len(), 3);
        assert_eq!(def.edges[1].label.as_deref(), Some("draft"));
    }

    #[tokio::test]
    async fn test_seed_builds_valid_workflow() {
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let def = parse(PIPELINE);

        let seeded = seed(&def, store.clone()).await.unwrap();
        assert_eq!(seeded.agents.len(), 2);
        assert_eq!(seeded.nodes.len(), 4);

        let builder = WorkflowBuilder::new(store);
        let order = builder.execution_order(seeded.workflow.id).await.unwrap();
        let names: Vec<_> = order
            .iter()
            .map(|id| seeded.node_name(*id).unwrap())
            .collect();
        assert_eq!(names, vec!["start", "research", "write", "done"]);
    }

    #[tokio::test]
    async fn test_seed_rejects_undefined_agent_reference() {
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let def = parse(
            r#"
[workflow]
name = "broken"

[[nodes]]
name = "work"
kind = "agent"
agent = "nobody"
"#,
        );

        let err = seed(&def, store).await.unwrap_err();
        assert!(err.to_string().contains("undefined agent 'nobody'"));
    }

    #[tokio::test]
    async fn test_seed_rejects_unknown_edge_endpoint() {
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let def = parse(
            r#"
[workflow]
name = "broken"

[[nodes]]
name = "start"
kind = "start"

[[edges]]
source = "start"
target = "missing"
"#,
        );

        let err = seed(&def, store).await.unwrap_err();
        assert!(err.to_string().contains("undefined node 'missing'"));
    }

    #[tokio::test]
    async fn test_seed_rejects_duplicate_node_names() {
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let def = parse(
            r#"
[workflow]
name = "broken"

[[nodes]]
name = "twin"
kind = "start"

[[nodes]]
name = "twin"
kind = "end"
"#,
        );

        let err = seed(&def, store).await.unwrap_err();
        assert!(err.to_string().contains("duplicate node name"));
    }

    #[tokio::test]
    async fn test_seed_rejects_cycles() {
        let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let def = parse(
            r#"
[workflow]
name = "cyclic"

[[nodes]]
name = "a"
kind = "start"

[[nodes]]
name = "b"
kind = "end"

[[edges]]
source = "a"
target = "b"

[[edges]]
source = "b"
target = "a"
"#,
        );

        let err = seed(&def, store).await.unwrap_err();
        assert!(err.to_string().to_lowercase().contains("cycle"));
    }
}
