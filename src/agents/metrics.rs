use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weight kept from the previous response-time average on each success.
pub const RESPONSE_TIME_DECAY: f64 = 0.9;
/// Weight given to the newest sample.
pub const RESPONSE_TIME_SAMPLE_WEIGHT: f64 = 0.1;

/// Rolling performance record for one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    /// Cumulative `successes / total_executions`, 1.0 before the first run.
    pub success_rate: f64,
    /// Exponential moving average of successful run times, in seconds.
    pub avg_response_time: f64,
    pub error_count: u64,
    pub success_count: u64,
    pub total_executions: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time: 0.0,
            error_count: 0,
            success_count: 0,
            total_executions: 0,
            last_execution_at: None,
        }
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, started_at: DateTime<Utc>, elapsed: Duration) {
        self.total_executions += 1;
        self.success_count += 1;
        self.last_execution_at = Some(started_at);

        let sample = elapsed.as_secs_f64();
        self.avg_response_time = if self.success_count == 1 {
            sample
        } else {
            RESPONSE_TIME_DECAY * self.avg_response_time + RESPONSE_TIME_SAMPLE_WEIGHT * sample
        };

        self.refresh_success_rate();
    }

    /// Failures never contribute a response-time sample.
    pub fn record_failure(&mut self, started_at: DateTime<Utc>) {
        self.total_executions += 1;
        self.error_count += 1;
        self.last_execution_at = Some(started_at);
        self.refresh_success_rate();
    }

    fn refresh_success_rate(&mut self) {
        self.success_rate = self.success_count as f64 / self.total_executions as f64;
    }
}
