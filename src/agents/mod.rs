pub mod agent;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod registry;



pub use agent::{default_fallback, manual_task, scheduled_task, Agent, AgentFailure, AgentOutput, TaskPayload};
pub use executor::{AgentHandle, ExecutionOutcome, ExecutionResult};
pub use metrics::AgentMetrics;
pub use orchestrator::{
    AgentTaskRunner, Orchestrator, OrchestratorEvent, OrchestratorState, OrchestratorStatus,
    ShutdownReport,
};
pub use registry::{AgentFactory, AgentRegistry, LoadFailure, LoadOutcome};
