use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use crate::agents::agent::{Agent, AgentOutput, TaskPayload};
use crate::agents::metrics::AgentMetrics;
use crate::config::AgentDescriptor;
use crate::error::Result;

/// Outcome of one wrapped invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub agent: String,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        data: AgentOutput,
        /// Seconds spent in `execute`.
        execution_time: f64,
    },
    Fallback {
        data: AgentOutput,
        error: String,
    },
}

impl ExecutionResult {
    pub fn status(&self) -> &'static str {
        match self.outcome {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Fallback { .. } => "fallback",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Success { .. })
    }

    pub fn data(&self) -> &AgentOutput {
        match &self.outcome {
            ExecutionOutcome::Success { data, .. } | ExecutionOutcome::Fallback { data, .. } => data,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ExecutionOutcome::Fallback { error, .. } => Some(error),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

/// A loaded agent together with its descriptor and metrics record.
///
/// Invocations of one agent never overlap: scheduled ticks, on-demand runs
/// and the final `close_resources` all take `run_lock`.
pub struct AgentHandle {
    descriptor: AgentDescriptor,
    agent: Arc<dyn Agent>,
    metrics: Mutex<AgentMetrics>,
    run_lock: Mutex<()>,
}

impl AgentHandle {
    pub fn new(descriptor: AgentDescriptor, agent: Arc<dyn Agent>) -> Self {
        Self {
            descriptor,
            agent,
            metrics: Mutex::new(AgentMetrics::new()),
            run_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn schedule(&self) -> Option<&str> {
        self.descriptor.schedule.as_deref()
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub async fn metrics(&self) -> AgentMetrics {
        self.metrics.lock().await.clone()
    }

    /// Release the agent's resources once any in-progress invocation ends.
    pub async fn close_resources(&self) -> Result<()> {
        let _running = self.run_lock.lock().await;
        self.agent.close_resources().await
    }

    /// Run the agent, falling back on error.
    ///
    /// Updates the metrics record exactly once, after `execute` returns and
    /// before the result is handed back. The only `Err` this returns is a
    /// failure of the fallback strategy itself.
    pub async fn execute_with_fallback(&self, task: TaskPayload) -> Result<ExecutionResult> {
        let _running = self.run_lock.lock().await;
        let started_at = Utc::now();
        let start = Instant::now();
        let name = self.name().to_string();

        debug!("Executing agent {} with task {:?}", name, task);

        match self.agent.execute(&task).await {
            Ok(data) => {
                let elapsed = start.elapsed();
                self.metrics.lock().await.record_success(started_at, elapsed);

                Ok(ExecutionResult {
                    run_id: Uuid::new_v4(),
                    agent: name,
                    finished_at: Utc::now(),
                    outcome: ExecutionOutcome::Success {
                        data,
                        execution_time: elapsed.as_secs_f64(),
                    },
                })
            }
            Err(e) => {
                error!("Task execution failed for agent {}: {}", name, e);
                self.metrics.lock().await.record_failure(started_at);

                let data = match self.agent.fallback_strategy(&task, e.as_ref()).await {
                    Ok(data) => data,
                    Err(fallback_error) => {
                        error!(
                            "Fallback strategy for agent {} failed: {}",
                            name, fallback_error
                        );
                        return Err(fallback_error);
                    }
                };

                Ok(ExecutionResult {
                    run_id: Uuid::new_v4(),
                    agent: name,
                    finished_at: Utc::now(),
                    outcome: ExecutionOutcome::Fallback {
                        data,
                        error: e.to_string(),
                    },
                })
            }
        }
    }
}
