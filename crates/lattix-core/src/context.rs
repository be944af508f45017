use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::types::NodeId;

/// Reserved key holding the caller-supplied input for a run.
pub const KEY_INITIAL_INPUT: &str = "initial_input";

/// Reserved key holding the most recent node output.
pub const KEY_LAST_OUTPUT: &str = "last_output";

/// Key-value state threaded through a run, copy-on-write.
///
/// A snapshot is an O(1) clone of the backing `Arc`; the first write after
/// taking one copies the map, so snapshots keep exactly what they saw. Log
/// rows store the snapshot handed to a node, not the state the run has
/// moved on to.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    data: Arc<HashMap<String, Value>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with the run's initial input.
    pub fn seeded(initial_input: Value) -> Self {
        let mut ctx = Self::new();
        ctx.insert(KEY_INITIAL_INPUT, initial_input);
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.data).insert(key.into(), value);
    }

    pub fn initial_input(&self) -> Option<&Value> {
        self.get(KEY_INITIAL_INPUT)
    }

    pub fn last_output(&self) -> Option<&Value> {
        self.get(KEY_LAST_OUTPUT)
    }

    /// Store a node's output under its per-node key and as the last output.
    pub fn record_node_output(&mut self, node_id: NodeId, output: Value) {
        self.insert(format!("node_{}_output", node_id), output.clone());
        self.insert(KEY_LAST_OUTPUT, output);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable view of the current state.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            data: Arc::clone(&self.data),
        }
    }

    /// The whole context as one JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Immutable view of a [`SharedContext`] at a point in time.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    data: Arc<HashMap<String, Value>>,
}

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn initial_input(&self) -> Option<&Value> {
        self.get(KEY_INITIAL_INPUT)
    }

    pub fn last_output(&self) -> Option<&Value> {
        self.get(KEY_LAST_OUTPUT)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
