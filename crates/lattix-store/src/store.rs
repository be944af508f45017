use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use lattix_core::error::{LattixError, Result};
use lattix_core::traits::ExecutionStore;
use lattix_core::types::{
    AgentId, AgentProfile, Edge, EdgeId, Execution, ExecutionId, ExecutionLog, ExecutionStatus,
    NewAgent, NewEdge, NewLogEntry, NewNode, Node, NodeId, NodeKind, Workflow, WorkflowId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    system_prompt TEXT NOT NULL,
    model_id TEXT NOT NULL,
    temperature REAL NOT NULL DEFAULT 0.7,
    max_retries INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id INTEGER NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    agent_id INTEGER REFERENCES agents(id),
    name TEXT NOT NULL,
    config TEXT,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_nodes_workflow ON nodes(workflow_id);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id INTEGER NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    source_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    condition TEXT,
    label TEXT
);

CREATE INDEX IF NOT EXISTS idx_edges_workflow ON edges(workflow_id);

CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id INTEGER NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    initial_input TEXT NOT NULL,
    final_output TEXT,
    error_message TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id);

CREATE TABLE IF NOT EXISTS execution_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    node_id INTEGER NOT NULL,
    agent_id INTEGER,
    input TEXT NOT NULL,
    output TEXT,
    error_message TEXT,
    delegated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_execution ON execution_logs(execution_id, id);
";

/// SQLite-backed execution store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database file at `path`, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn =
            Connection::open(path).map_err(|e| LattixError::Database(e.to_string()))?;

        // WAL for better concurrent behavior
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| LattixError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite store opened");
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| LattixError::Database(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LattixError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LattixError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LattixError::Database(e.to_string()))
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_json(s: String) -> Value {
    serde_json::from_str(&s).unwrap_or(Value::Null)
}

fn opt_json(s: Option<String>) -> Option<Value> {
    s.map(parse_json)
}

fn to_json_string(v: &Value) -> String {
    v.to_string()
}

fn workflow_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: WorkflowId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        is_active: row.get(3)?,
        created_at: parse_ts(row.get(4)?),
        updated_at: parse_ts(row.get(5)?),
    })
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let kind: String = row.get(2)?;
    Ok(Node {
        id: NodeId(row.get(0)?),
        workflow_id: WorkflowId(row.get(1)?),
        kind: NodeKind::parse(&kind).unwrap_or(NodeKind::Condition),
        agent_id: row.get::<_, Option<i64>>(3)?.map(AgentId),
        name: row.get(4)?,
        config: opt_json(row.get(5)?),
        position: row.get(6)?,
    })
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: EdgeId(row.get(0)?),
        workflow_id: WorkflowId(row.get(1)?),
        source_node_id: NodeId(row.get(2)?),
        target_node_id: NodeId(row.get(3)?),
        condition: row.get(4)?,
        label: row.get(5)?,
    })
}

fn agent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentProfile> {
    Ok(AgentProfile {
        id: AgentId(row.get(0)?),
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        model_id: row.get(3)?,
        temperature: row.get(4)?,
        max_retries: row.get(5)?,
        is_active: row.get(6)?,
        created_at: parse_ts(row.get(7)?),
        updated_at: parse_ts(row.get(8)?),
    })
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(2)?;
    Ok(Execution {
        id: ExecutionId(row.get(0)?),
        workflow_id: WorkflowId(row.get(1)?),
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        initial_input: parse_json(row.get(3)?),
        final_output: opt_json(row.get(4)?),
        error_message: row.get(5)?,
        started_at: parse_ts(row.get(6)?),
        completed_at: row.get::<_, Option<String>>(7)?.map(parse_ts),
    })
}

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLog> {
    Ok(ExecutionLog {
        id: row.get(0)?,
        execution_id: ExecutionId(row.get(1)?),
        node_id: NodeId(row.get(2)?),
        agent_id: row.get::<_, Option<i64>>(3)?.map(AgentId),
        input: parse_json(row.get(4)?),
        output: opt_json(row.get(5)?),
        error_message: row.get(6)?,
        delegated: row.get(7)?,
        created_at: parse_ts(row.get(8)?),
    })
}

impl ExecutionStore for SqliteStore {
    fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> BoxFuture<'_, Result<Workflow>> {
        let name = name.to_string();
        let description = description.map(|s| s.to_string());

        Box::pin(async move {
            let conn = self.lock()?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO workflows (name, description, is_active, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)",
                params![name, description, now.to_rfc3339()],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(Workflow {
                id: WorkflowId(conn.last_insert_rowid()),
                name,
                description,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
        })
    }

    fn get_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<Option<Workflow>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, name, description, is_active, created_at, updated_at
                 FROM workflows WHERE id = ?1",
                params![id.0],
                workflow_from_row,
            )
            .optional()
            .map_err(|e| LattixError::Database(e.to_string()))
        })
    }

    fn list_workflows(&self, include_inactive: bool) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let sql = if include_inactive {
                "SELECT id, name, description, is_active, created_at, updated_at
                 FROM workflows ORDER BY id"
            } else {
                "SELECT id, name, description, is_active, created_at, updated_at
                 FROM workflows WHERE is_active = 1 ORDER BY id"
            };
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], workflow_from_row)
                .map_err(|e| LattixError::Database(e.to_string()))?;

            let mut workflows = Vec::new();
            for row in rows {
                workflows.push(row.map_err(|e| LattixError::Database(e.to_string()))?);
            }
            Ok(workflows)
        })
    }

    fn deactivate_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE workflows SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                    params![id.0, Utc::now().to_rfc3339()],
                )
                .map_err(|e| LattixError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LattixError::WorkflowNotFound(id));
            }
            Ok(())
        })
    }

    fn delete_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute("DELETE FROM workflows WHERE id = ?1", params![id.0])
                .map_err(|e| LattixError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LattixError::WorkflowNotFound(id));
            }
            debug!(workflow_id = %id, "workflow hard-deleted");
            Ok(())
        })
    }

    fn insert_node(&self, node: NewNode) -> BoxFuture<'_, Result<Node>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO nodes (workflow_id, kind, agent_id, name, config, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    node.workflow_id.0,
                    node.kind.as_str(),
                    node.agent_id.map(|a| a.0),
                    node.name,
                    node.config.as_ref().map(to_json_string),
                    node.position,
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(Node {
                id: NodeId(conn.last_insert_rowid()),
                workflow_id: node.workflow_id,
                kind: node.kind,
                agent_id: node.agent_id,
                name: node.name,
                config: node.config,
                position: node.position,
            })
        })
    }

    fn remove_node(&self, id: NodeId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            // Incident edges go with the node via FK cascade.
            let changed = conn
                .execute("DELETE FROM nodes WHERE id = ?1", params![id.0])
                .map_err(|e| LattixError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LattixError::NodeNotFound(id));
            }
            Ok(())
        })
    }

    fn insert_edge(&self, edge: NewEdge) -> BoxFuture<'_, Result<Edge>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO edges (workflow_id, source_node_id, target_node_id, condition, label)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.workflow_id.0,
                    edge.source_node_id.0,
                    edge.target_node_id.0,
                    edge.condition,
                    edge.label,
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(Edge {
                id: EdgeId(conn.last_insert_rowid()),
                workflow_id: edge.workflow_id,
                source_node_id: edge.source_node_id,
                target_node_id: edge.target_node_id,
                condition: edge.condition,
                label: edge.label,
            })
        })
    }

    fn remove_edge(&self, id: EdgeId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute("DELETE FROM edges WHERE id = ?1", params![id.0])
                .map_err(|e| LattixError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LattixError::EdgeNotFound(id));
            }
            Ok(())
        })
    }

    fn load_graph(
        &self,
        workflow_id: WorkflowId,
    ) -> BoxFuture<'_, Result<(Vec<Node>, Vec<Edge>)>> {
        Box::pin(async move {
            let conn = self.lock()?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, workflow_id, kind, agent_id, name, config, position
                     FROM nodes WHERE workflow_id = ?1 ORDER BY id",
                )
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let rows = stmt
                .query_map(params![workflow_id.0], node_from_row)
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let mut nodes = Vec::new();
            for row in rows {
                nodes.push(row.map_err(|e| LattixError::Database(e.to_string()))?);
            }

            let mut stmt = conn
                .prepare(
                    "SELECT id, workflow_id, source_node_id, target_node_id, condition, label
                     FROM edges WHERE workflow_id = ?1 ORDER BY id",
                )
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let rows = stmt
                .query_map(params![workflow_id.0], edge_from_row)
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let mut edges = Vec::new();
            for row in rows {
                edges.push(row.map_err(|e| LattixError::Database(e.to_string()))?);
            }

            Ok((nodes, edges))
        })
    }

    fn create_agent(&self, agent: NewAgent) -> BoxFuture<'_, Result<AgentProfile>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO agents (name, system_prompt, model_id, temperature, max_retries,
                                     is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    agent.name,
                    agent.system_prompt,
                    agent.model_id,
                    agent.temperature,
                    agent.max_retries,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(AgentProfile {
                id: AgentId(conn.last_insert_rowid()),
                name: agent.name,
                system_prompt: agent.system_prompt,
                model_id: agent.model_id,
                temperature: agent.temperature,
                max_retries: agent.max_retries,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
        })
    }

    fn get_agent(&self, id: AgentId) -> BoxFuture<'_, Result<Option<AgentProfile>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, name, system_prompt, model_id, temperature, max_retries,
                        is_active, created_at, updated_at
                 FROM agents WHERE id = ?1",
                params![id.0],
                agent_from_row,
            )
            .optional()
            .map_err(|e| LattixError::Database(e.to_string()))
        })
    }

    fn list_agents(&self, active_only: bool) -> BoxFuture<'_, Result<Vec<AgentProfile>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let sql = if active_only {
                "SELECT id, name, system_prompt, model_id, temperature, max_retries,
                        is_active, created_at, updated_at
                 FROM agents WHERE is_active = 1 ORDER BY id"
            } else {
                "SELECT id, name, system_prompt, model_id, temperature, max_retries,
                        is_active, created_at, updated_at
                 FROM agents ORDER BY id"
            };
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], agent_from_row)
                .map_err(|e| LattixError::Database(e.to_string()))?;

            let mut agents = Vec::new();
            for row in rows {
                agents.push(row.map_err(|e| LattixError::Database(e.to_string()))?);
            }
            Ok(agents)
        })
    }

    fn deactivate_agent(&self, id: AgentId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE agents SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                    params![id.0, Utc::now().to_rfc3339()],
                )
                .map_err(|e| LattixError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LattixError::AgentNotFound(id));
            }
            Ok(())
        })
    }

    fn create_execution(
        &self,
        workflow_id: WorkflowId,
        initial_input: Value,
    ) -> BoxFuture<'_, Result<Execution>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO executions (workflow_id, status, initial_input, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    workflow_id.0,
                    ExecutionStatus::Pending.as_str(),
                    to_json_string(&initial_input),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(Execution {
                id: ExecutionId(conn.last_insert_rowid()),
                workflow_id,
                status: ExecutionStatus::Pending,
                initial_input,
                final_output: None,
                error_message: None,
                started_at: now,
                completed_at: None,
            })
        })
    }

    fn get_execution(&self, id: ExecutionId) -> BoxFuture<'_, Result<Option<Execution>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, workflow_id, status, initial_input, final_output, error_message,
                        started_at, completed_at
                 FROM executions WHERE id = ?1",
                params![id.0],
                execution_from_row,
            )
            .optional()
            .map_err(|e| LattixError::Database(e.to_string()))
        })
    }

    fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        final_output: Option<Value>,
        error_message: Option<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;

            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM executions WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let Some(current) = current else {
                return Err(LattixError::ExecutionNotFound(id));
            };
            let from = ExecutionStatus::parse(&current).ok_or_else(|| {
                LattixError::Database(format!("unknown status '{}' on execution {}", current, id))
            })?;
            if !from.can_transition_to(status) {
                return Err(LattixError::InvalidTransition { from, to: status });
            }

            let completed_at = if status.is_terminal() {
                Some(Utc::now().to_rfc3339())
            } else {
                None
            };
            conn.execute(
                "UPDATE executions
                 SET status = ?2, final_output = ?3, error_message = ?4, completed_at = ?5
                 WHERE id = ?1",
                params![
                    id.0,
                    status.as_str(),
                    final_output.as_ref().map(to_json_string),
                    error_message,
                    completed_at,
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            debug!(execution_id = %id, from = %from, to = %status, "execution status updated");
            Ok(())
        })
    }

    fn append_log(&self, entry: NewLogEntry) -> BoxFuture<'_, Result<ExecutionLog>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO execution_logs (execution_id, node_id, agent_id, input, output,
                                             error_message, delegated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.execution_id.0,
                    entry.node_id.0,
                    entry.agent_id.map(|a| a.0),
                    to_json_string(&entry.input),
                    entry.output.as_ref().map(to_json_string),
                    entry.error_message,
                    entry.delegated,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| LattixError::Database(e.to_string()))?;

            Ok(ExecutionLog {
                id: conn.last_insert_rowid(),
                execution_id: entry.execution_id,
                node_id: entry.node_id,
                agent_id: entry.agent_id,
                input: entry.input,
                output: entry.output,
                error_message: entry.error_message,
                delegated: entry.delegated,
                created_at: now,
            })
        })
    }

    fn list_logs(&self, execution_id: ExecutionId) -> BoxFuture<'_, Result<Vec<ExecutionLog>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, execution_id, node_id, agent_id, input, output, error_message,
                            delegated, created_at
                     FROM execution_logs WHERE execution_id = ?1 ORDER BY id ASC",
                )
                .map_err(|e| LattixError::Database(e.to_string()))?;
            let rows = stmt
                .query_map(params![execution_id.0], log_from_row)
                .map_err(|e| LattixError::Database(e.to_string()))?;

            let mut logs = Vec::new();
            for row in rows {
                logs.push(row.map_err(|e| LattixError::Database(e.to_string()))?);
            }
            Ok(logs)
        })
    }
}
