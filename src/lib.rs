pub mod agents;
pub mod api;
pub mod assistants;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod sinks;
pub mod tools;

pub use agents::{Agent, AgentRegistry, Orchestrator, OrchestratorState};
pub use assistants::{register_builtin, BuiltinServices};
pub use config::Config;
pub use error::{ButlerError, Result};
