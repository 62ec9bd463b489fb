pub mod discord;
pub mod file;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::executor::ExecutionResult;
use crate::config::SinkConfig;
use crate::error::Result;

pub use discord::DiscordWebhook;
pub use file::JsonlResultSink;

/// Receives every execution result the orchestrator produces.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, result: &ExecutionResult) -> Result<()>;
}

#[derive(Default)]
pub struct SinkManager {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl SinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the sinks named in configuration.
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let mut manager = Self::new();

        if let Some(dir) = &config.results_directory {
            info!("Writing execution results under {}", dir.display());
            manager.add_sink(Arc::new(JsonlResultSink::new(dir.clone())));
        }

        if let Some(url) = &config.discord_webhook_url {
            info!("Posting execution results to Discord");
            manager.add_sink(Arc::new(DiscordWebhook::new(
                url.clone(),
                config.notify_on_success,
            )?));
        }

        Ok(manager)
    }

    pub fn add_sink(&mut self, sink: Arc<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hand the result to every sink. Failures are logged, never returned.
    pub async fn deliver(&self, result: &ExecutionResult) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(result).await {
                warn!(
                    "Result sink {} failed to deliver result for {}: {}",
                    sink.name(),
                    result.agent,
                    e
                );
            }
        }
    }
}
