use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use personal_butler::api::start_api_server;
use personal_butler::config::{ConfigManager, FileConfigManager};
use personal_butler::sinks::SinkManager;
use personal_butler::{register_builtin, AgentRegistry, BuiltinServices, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config_manager = FileConfigManager::new(config_path.clone());
    let config = config_manager
        .load_config()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("loading {}", config_path.display()))?;

    tracing::info!("Starting Personal Butler");

    let mut registry = AgentRegistry::new();
    register_builtin(&mut registry, BuiltinServices::default());

    let sinks = SinkManager::from_config(&config.sinks)
        .map_err(|e| anyhow::anyhow!(e))
        .context("configuring result sinks")?;
    let server = Arc::new(config.server.clone());

    let mut orchestrator = Orchestrator::new(config, registry).with_sinks(sinks);
    orchestrator
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("initializing orchestrator")?;
    orchestrator
        .start_scheduler()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("starting scheduler")?;

    let orchestrator = Arc::new(RwLock::new(orchestrator));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    if let Err(e) = start_api_server(orchestrator.clone(), server, shutdown).await {
        tracing::error!("API server error: {}", e);
    }

    let report = orchestrator.write().await.shutdown().await;
    for failure in &report.close_failures {
        tracing::warn!("{} did not close cleanly: {}", failure.agent, failure.reason);
    }

    tracing::info!("Personal Butler stopped.");
    Ok(())
}
