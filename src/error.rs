use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Error, Debug)]
pub enum ButlerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Failed to load agent '{agent}': {reason}")]
    AgentLoadError { agent: String, reason: String },

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Invalid schedule for agent '{agent}': {reason}")]
    ScheduleError { agent: String, reason: String },

    #[error("A job is already armed for agent '{0}'")]
    DuplicateJob(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid orchestrator state: {0}")]
    InvalidState(String),
}

impl ButlerError {
    /// Stable name of the error variant, reported by fallback responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ButlerError::ConfigError(_) => "ConfigError",
            ButlerError::UnknownAgent(_) => "UnknownAgent",
            ButlerError::AgentLoadError { .. } => "AgentLoadError",
            ButlerError::AgentError(_) => "AgentError",
            ButlerError::ScheduleError { .. } => "ScheduleError",
            ButlerError::DuplicateJob(_) => "DuplicateJob",
            ButlerError::NetworkError(_) => "NetworkError",
            ButlerError::ParseError(_) => "ParseError",
            ButlerError::StorageError(_) => "StorageError",
            ButlerError::InvalidState(_) => "InvalidState",
        }
    }
}

/// Kind name for any boxed error raised by an agent.
pub fn error_kind(error: &(dyn std::error::Error + Send + Sync + 'static)) -> &'static str {
    if let Some(err) = error.downcast_ref::<ButlerError>() {
        err.kind()
    } else if error.is::<reqwest::Error>() {
        "HttpError"
    } else if error.is::<std::io::Error>() {
        "IoError"
    } else if error.is::<serde_json::Error>() {
        "JsonError"
    } else {
        "Error"
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for ButlerError {
    fn from(err: std::io::Error) -> Self {
        ButlerError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for ButlerError {
    fn from(err: serde_json::Error) -> Self {
        ButlerError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for ButlerError {
    fn from(err: toml::de::Error) -> Self {
        ButlerError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for ButlerError {
    fn from(err: reqwest::Error) -> Self {
        ButlerError::NetworkError(err.to_string())
    }
}
