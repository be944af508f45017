use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::warn;

use lattix_core::context::ContextSnapshot;
use lattix_core::error::Result;
use lattix_core::traits::{AgentInvoker, DelegationHandle};
use lattix_core::types::{AgentProfile, AgentReply};

/// Offline invoker for the CLI and demos.
///
/// Echoes the task back tagged with the agent's name. Lines of the form
/// `delegate: <agent name>` in the system prompt make the agent hand the
/// task to that agent first and fold the answer into its own, which is
/// enough to exercise the whole delegation path without a model backend.
pub struct EchoInvoker;

impl AgentInvoker for EchoInvoker {
    fn invoke(
        &self,
        agent: AgentProfile,
        task: String,
        context: ContextSnapshot,
        delegation: Arc<dyn DelegationHandle>,
    ) -> BoxFuture<'_, Result<AgentReply>> {
        Box::pin(async move {
            let mut notes = Vec::new();
            for target_name in delegate_directives(&agent.system_prompt) {
                let target = delegation
                    .visible_agents()
                    .into_iter()
                    .find(|a| a.name == target_name);
                let Some(target) = target else {
                    warn!(
                        agent = %agent.name,
                        target = %target_name,
                        "delegate directive names an unknown agent, skipping"
                    );
                    continue;
                };
                let reply = delegation.delegate(target.id, task.clone()).await?;
                notes.push(format!("{}: {}", target.name, reply.text));
            }

            let text = if notes.is_empty() {
                format!("[{}] {}", agent.name, task)
            } else {
                format!("[{}] {} | {}", agent.name, task, notes.join(" | "))
            };

            Ok(AgentReply::new(text).with_structured(json!({
                "model_id": agent.model_id,
                "temperature": agent.temperature,
                "context_keys": context.len(),
            })))
        })
    }
}

/// Agent names listed as `delegate: <name>` lines in a system prompt.
fn delegate_directives(system_prompt: &str) -> Vec<String> {
    system_prompt
        .lines()
        .filter_map(|line| line.trim().strip_prefix("delegate:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
