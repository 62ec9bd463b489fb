use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agents::agent::{scheduled_task, TaskPayload};
use crate::agents::executor::{AgentHandle, ExecutionResult};
use crate::agents::metrics::AgentMetrics;
use crate::agents::registry::{AgentRegistry, LoadFailure};
use crate::config::{self, Config};
use crate::error::{ButlerError, Result};
use crate::scheduler::{Clock, JobRunner, JobSpec, ScheduledJobInfo, Scheduler};
use crate::sinks::SinkManager;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Created,
    Initialized,
    Scheduling,
    Running,
    ShuttingDown,
    Stopped,
}

/// Events broadcast to subscribers (HTTP stream, tests).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    StateChanged {
        from: OrchestratorState,
        to: OrchestratorState,
    },
    ExecutionFinished {
        result: ExecutionResult,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub schedule: Option<String>,
    pub metrics: AgentMetrics,
}

/// Orchestrator status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub agents: Vec<AgentSummary>,
    pub jobs: Vec<ScheduledJobInfo>,
    pub load_failures: Vec<LoadFailure>,
    pub schedule_failures: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}

/// An agent whose `close_resources` failed during shutdown.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CloseFailure {
    pub agent: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub close_failures: Vec<CloseFailure>,
}

/// Everything that happens to a result after the wrapper produces it.
#[derive(Clone)]
struct Dispatch {
    sinks: Arc<SinkManager>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Dispatch {
    async fn run(&self, handle: &AgentHandle, task: TaskPayload) -> Result<ExecutionResult> {
        let result = handle.execute_with_fallback(task).await?;
        info!(
            "Task for {} finished with status: {}",
            result.agent,
            result.status()
        );

        self.sinks.deliver(&result).await;
        let _ = self.events.send(OrchestratorEvent::ExecutionFinished {
            result: result.clone(),
        });
        Ok(result)
    }
}

/// A loaded agent bound to the orchestrator's result pipeline. Holding one
/// does not borrow the orchestrator, so hosts can run long tasks without
/// keeping it locked.
#[derive(Clone)]
pub struct AgentTaskRunner {
    handle: Arc<AgentHandle>,
    dispatch: Dispatch,
}

impl AgentTaskRunner {
    pub fn agent_name(&self) -> &str {
        self.handle.name()
    }

    pub async fn run(&self, task: TaskPayload) -> Result<ExecutionResult> {
        self.dispatch.run(&self.handle, task).await
    }
}

pub struct Orchestrator {
    config: Config,
    registry: AgentRegistry,
    agents: BTreeMap<String, Arc<AgentHandle>>,
    load_failures: Vec<LoadFailure>,
    schedule_failures: Vec<String>,
    scheduler: Scheduler,
    dispatch: Dispatch,
    state: OrchestratorState,
    start_time: Instant,
}

impl Orchestrator {
    pub fn new(config: Config, registry: AgentRegistry) -> Self {
        let (events, _) = broadcast::channel(1024);
        let scheduler = Scheduler::new(config.scheduler.shutdown_grace);

        Self {
            config,
            registry,
            agents: BTreeMap::new(),
            load_failures: Vec::new(),
            schedule_failures: Vec::new(),
            scheduler,
            dispatch: Dispatch {
                sinks: Arc::new(SinkManager::new()),
                events,
            },
            state: OrchestratorState::Created,
            start_time: Instant::now(),
        }
    }

    pub fn with_sinks(mut self, sinks: SinkManager) -> Self {
        self.dispatch.sinks = Arc::new(sinks);
        self
    }

    /// Replace the scheduler's wall clock. Only meaningful before `start_scheduler`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.scheduler = Scheduler::with_clock(self.config.scheduler.shutdown_grace, clock);
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.dispatch.events.subscribe()
    }

    /// Load every enabled agent. Individual load failures are recorded and
    /// skipped; only malformed top-level configuration is an error.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != OrchestratorState::Created {
            return Err(ButlerError::InvalidState(format!(
                "initialize called in state {:?}",
                self.state
            ))
            .into());
        }

        info!("Initializing Personal Butler...");
        config::validate(&self.config)?;

        let outcome = self.registry.load(&self.config.agents);
        self.agents = outcome.agents;
        self.load_failures = outcome.failures;

        self.transition(OrchestratorState::Initialized);
        info!(
            "Personal Butler initialized with {} agent(s): {:?}",
            self.agents.len(),
            self.agents.keys().collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Arm one job per loaded agent that carries a schedule, and start the
    /// scheduler if anything was armed.
    pub async fn start_scheduler(&mut self) -> Result<()> {
        if self.state != OrchestratorState::Initialized {
            return Err(ButlerError::InvalidState(format!(
                "start_scheduler called in state {:?}",
                self.state
            ))
            .into());
        }

        info!("Starting scheduler...");
        self.transition(OrchestratorState::Scheduling);

        let specs: Vec<JobSpec> = self
            .agents
            .values()
            .filter_map(|handle| {
                let expression = handle.schedule()?.to_string();
                Some(JobSpec::new(
                    handle.name(),
                    expression,
                    self.scheduled_runner(handle.clone()),
                ))
            })
            .collect();

        let rejected = self.scheduler.arm(specs);
        self.schedule_failures = rejected.iter().map(|e| e.to_string()).collect();

        self.scheduler.run();
        self.transition(OrchestratorState::Running);
        Ok(())
    }

    fn scheduled_runner(&self, handle: Arc<AgentHandle>) -> JobRunner {
        let dispatch = self.dispatch.clone();
        Arc::new(move || {
            let handle = handle.clone();
            let dispatch = dispatch.clone();
            async move {
                info!("Executing scheduled task for agent: {}", handle.name());
                if let Err(e) = dispatch.run(&handle, scheduled_task()).await {
                    error!(
                        "Scheduled task for {} failed fatally: {}",
                        handle.name(),
                        e
                    );
                }
            }
            .boxed()
        })
    }

    /// Bind a loaded agent to the result pipeline for an ad-hoc run.
    pub fn task_runner(&self, name: &str) -> Result<AgentTaskRunner> {
        if matches!(
            self.state,
            OrchestratorState::ShuttingDown | OrchestratorState::Stopped
        ) {
            return Err(ButlerError::InvalidState(format!(
                "cannot run '{}' while {:?}",
                name, self.state
            ))
            .into());
        }

        let handle = self.agents.get(name).cloned().ok_or_else(|| {
            warn!("Attempted to run task for non-existent agent: {}", name);
            ButlerError::UnknownAgent(name.to_string())
        })?;

        Ok(AgentTaskRunner {
            handle,
            dispatch: self.dispatch.clone(),
        })
    }

    /// Run a loaded agent outside its schedule, with the same wrapper
    /// semantics as a scheduled tick.
    pub async fn run_agent_task(&self, name: &str, task: TaskPayload) -> Result<ExecutionResult> {
        let runner = self.task_runner(name)?;
        info!("Executing on-demand task for agent: {}", name);
        runner.run(task).await
    }

    /// Stop the scheduler, then release every agent's resources. Always ends
    /// in `Stopped`; a second call does nothing.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if self.state == OrchestratorState::Stopped {
            debug!("Shutdown requested but orchestrator is already stopped");
            return ShutdownReport::default();
        }

        info!("Shutting down Personal Butler...");
        self.transition(OrchestratorState::ShuttingDown);

        self.scheduler.stop().await;

        let mut report = ShutdownReport::default();
        for (name, handle) in &self.agents {
            debug!("Closing resources for agent: {}", name);
            match handle.close_resources().await {
                Ok(()) => report.closed.push(name.clone()),
                Err(e) => {
                    warn!("Error closing resources for agent {}: {}", name, e);
                    report.close_failures.push(CloseFailure {
                        agent: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.transition(OrchestratorState::Stopped);
        info!(
            "Personal Butler stopped ({} closed, {} close failure(s))",
            report.closed.len(),
            report.close_failures.len()
        );
        report
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub async fn metrics(&self, name: &str) -> Option<AgentMetrics> {
        match self.agents.get(name) {
            Some(handle) => Some(handle.metrics().await),
            None => None,
        }
    }

    pub fn load_failures(&self) -> &[LoadFailure] {
        &self.load_failures
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJobInfo> {
        self.scheduler.jobs()
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let mut agents = Vec::with_capacity(self.agents.len());
        for (name, handle) in &self.agents {
            agents.push(AgentSummary {
                name: name.clone(),
                schedule: handle.schedule().map(str::to_string),
                metrics: handle.metrics().await,
            });
        }

        OrchestratorStatus {
            state: self.state,
            agents,
            jobs: self.scheduler.jobs(),
            load_failures: self.load_failures.clone(),
            schedule_failures: self.schedule_failures.clone(),
            uptime: self.start_time.elapsed(),
        }
    }

    fn transition(&mut self, to: OrchestratorState) {
        let from = self.state;
        self.state = to;
        debug!("Orchestrator state {:?} -> {:?}", from, to);
        let _ = self
            .dispatch
            .events
            .send(OrchestratorEvent::StateChanged { from, to });
    }
}
