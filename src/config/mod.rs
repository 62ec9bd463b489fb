use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ButlerError, Result};

/// Opaque per-agent settings, handed untouched to the agent constructor.
pub type AgentSettings = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sinks: SinkConfig,
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
}

/// One `[[agents]]` entry. The core reads `enabled` and `schedule`;
/// everything else lands in `settings`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(flatten)]
    pub settings: AgentSettings,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            schedule: None,
            settings: AgentSettings::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long `stop()` waits for in-flight invocations before aborting them.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SinkConfig {
    pub results_directory: Option<PathBuf>,
    pub discord_webhook_url: Option<String>,
    pub notify_on_success: bool,
}

impl Config {
    /// Configuration written when no file exists yet: both built-in agents,
    /// disabled until the user fills in credentials.
    pub fn starter() -> Self {
        let github = AgentDescriptor::new("github_assistant")
            .disabled()
            .with_schedule("0 9 * * *")
            .with_setting("github_token", serde_json::json!("YOUR_GITHUB_TOKEN_HERE"))
            .with_setting("repositories", serde_json::json!(["octocat/Hello-World"]))
            .with_setting("analysis_depth", serde_json::json!("basic"));
        let email = AgentDescriptor::new("email_processor")
            .disabled()
            .with_schedule("*/30 * * * *")
            .with_setting("email_accounts", serde_json::json!([]));

        Self {
            agents: vec![github, email],
            ..Self::default()
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|descriptor| descriptor.name == name)
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .map_err(|e| ButlerError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = parse_config(&config_content)?;
        self.validate_config(&config)?;

        info!(
            "Configuration loaded successfully ({} agent entries)",
            config.agents.len()
        );
        Ok(config)
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| ButlerError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ButlerError::ConfigError(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        validate(config)
    }
}

impl FileConfigManager {
    async fn create_default_config(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ButlerError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        self.save_config(&Config::starter()).await?;
        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}

/// Parse a TOML document into a `Config` without validating it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| ButlerError::ConfigError(format!("Failed to parse TOML config: {}", e)))?;
    Ok(config)
}

/// Top-level checks. Schedules are left to the scheduler, which rejects a
/// bad expression for that job only.
pub fn validate(config: &Config) -> Result<()> {
    debug!("Validating configuration");

    let mut seen = HashSet::new();
    for descriptor in &config.agents {
        let name = descriptor.name.trim();
        if name.is_empty() {
            return Err(ButlerError::ConfigError("Agent name cannot be empty".to_string()).into());
        }
        if name.contains(char::is_whitespace) {
            return Err(ButlerError::ConfigError(format!(
                "Agent name '{}' cannot contain whitespace",
                descriptor.name
            ))
            .into());
        }
        if !seen.insert(name.to_string()) {
            return Err(ButlerError::ConfigError(format!(
                "Agent '{}' is configured more than once",
                descriptor.name
            ))
            .into());
        }
    }

    if config.server.port < 1024 {
        return Err(
            ButlerError::ConfigError("server.port must be between 1024 and 65535".to_string()).into(),
        );
    }

    if let Some(ref token) = config.server.api_token {
        if token.trim().is_empty() {
            return Err(ButlerError::ConfigError("server.api_token cannot be blank".to_string()).into());
        }
    }

    if let Some(ref webhook_url) = config.sinks.discord_webhook_url {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ButlerError::ConfigError(
                "sinks.discord_webhook_url must start with http:// or https://".to_string(),
            )
            .into());
        }
    }

    debug!("Configuration validation passed");
    Ok(())
}
