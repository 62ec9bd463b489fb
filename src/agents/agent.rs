use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{error_kind, Result};

/// Task payload handed to `Agent::execute`.
pub type TaskPayload = serde_json::Map<String, Value>;

/// Mapping produced by an agent, either from `execute` or its fallback.
pub type AgentOutput = serde_json::Map<String, Value>;

/// Any error an agent may raise out of `execute`.
pub type AgentFailure = dyn std::error::Error + Send + Sync + 'static;

/// A self-contained unit of work.
///
/// `execute` must be safe to run again from scratch. Partial failures inside
/// a multi-target task are recovered and reported in the output; only a
/// condition that prevents the work entirely is returned as `Err`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: &TaskPayload) -> Result<AgentOutput>;

    /// Degraded response used when `execute` fails. Errors returned from
    /// here are fatal to the invocation.
    async fn fallback_strategy(&self, _task: &TaskPayload, error: &AgentFailure) -> Result<AgentOutput> {
        Ok(default_fallback(self.name(), error))
    }

    /// Release any connection handles. Must be safe when nothing is open.
    async fn close_resources(&self) -> Result<()> {
        Ok(())
    }
}

/// Generic fallback: the error kind and a timestamp.
pub fn default_fallback(agent_name: &str, error: &AgentFailure) -> AgentOutput {
    warn!("Executing fallback for agent {} due to error: {}", agent_name, error);

    let mut output = AgentOutput::new();
    output.insert(
        "message".to_string(),
        json!(format!(
            "Agent {} encountered an error but provided basic fallback.",
            agent_name
        )),
    );
    output.insert("error_type".to_string(), json!(error_kind(error)));
    output.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    output
}

/// Payload used for every scheduler tick.
pub fn scheduled_task() -> TaskPayload {
    trigger_task("scheduled")
}

/// Payload used for on-demand runs that carry no task of their own.
pub fn manual_task() -> TaskPayload {
    trigger_task("manual")
}

fn trigger_task(trigger: &str) -> TaskPayload {
    let mut task = TaskPayload::new();
    task.insert("trigger".to_string(), json!(trigger));
    task
}
