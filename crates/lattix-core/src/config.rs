use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LattixError, Result};

/// Top-level Lattix configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Orchestration engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum delegation nesting before a delegate call fails closed.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
    /// Worker tasks consuming the run queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Run jobs the queue buffers before start_execution waits.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-invocation timeout in seconds (0 = no timeout).
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
    /// Hard cap on agent invocations per run, nodes plus delegations
    /// (0 = unlimited).
    #[serde(default)]
    pub max_invocations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: default_max_delegation_depth(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            invoke_timeout_secs: default_invoke_timeout(),
            max_invocations: 0,
        }
    }
}

fn default_max_delegation_depth() -> usize { 5 }
fn default_workers() -> usize { 4 }
fn default_queue_capacity() -> usize { 64 }
fn default_invoke_timeout() -> u64 { 120 }

/// SQLite persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file path. `${ENV_VAR}` references are expanded at load.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String { "lattix.db".to_string() }

impl AppConfig {
    /// Parse a TOML config file, expanding `${ENV_VAR}` references first.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| LattixError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| LattixError::Config(e.to_string()))
    }

    /// Load from the given path, or fall back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` references. Unset variables are left verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start + 2..].find('}') else {
            // Unterminated reference, keep as-is.
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &rest[start + 2..start + 2 + len];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    out
}
