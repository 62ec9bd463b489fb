//! Cron-driven job scheduler.
//!
//! One driver task sleeps until the earliest fire time among the armed jobs,
//! then launches every due job on a `JoinSet`. A job never overlaps itself:
//! a tick that arrives while the previous invocation is still running is
//! skipped.

pub mod cron;


use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

pub use self::cron::{CronError, CronExpression};
use crate::error::ButlerError;

pub type JobFuture = BoxFuture<'static, ()>;

/// Produces one invocation of a job each time it is called.
pub type JobRunner = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Source of wall-clock time for fire-time calculations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A job to arm: which agent, on what schedule, and how to run it.
pub struct JobSpec {
    pub agent: String,
    pub expression: String,
    pub runner: JobRunner,
}

impl JobSpec {
    pub fn new(agent: impl Into<String>, expression: impl Into<String>, runner: JobRunner) -> Self {
        Self {
            agent: agent.into(),
            expression: expression.into(),
            runner,
        }
    }
}

/// Snapshot of an armed job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    pub id: String,
    pub expression: String,
    pub next_run: Option<DateTime<Local>>,
    pub running: bool,
}

struct ScheduledJob {
    id: String,
    expression: CronExpression,
    runner: JobRunner,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the invocation ends, including on abort.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    jobs: BTreeMap<String, Arc<ScheduledJob>>,
    clock: Arc<dyn Clock>,
    shutdown_grace: Duration,
    shutdown_signal: Option<broadcast::Sender<()>>,
    driver_task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Scheduler {
    pub fn new(shutdown_grace: Duration) -> Self {
        Self::with_clock(shutdown_grace, Arc::new(SystemClock))
    }

    pub fn with_clock(shutdown_grace: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            clock,
            shutdown_grace,
            shutdown_signal: None,
            driver_task: None,
            stopped: false,
        }
    }

    /// Arm one job. Rejects a second job for the same agent, a malformed
    /// expression, an expression that never fires, and any arming once the
    /// scheduler is running or stopped.
    pub fn add_job(&mut self, spec: JobSpec) -> Result<(), ButlerError> {
        if self.stopped {
            return Err(ButlerError::InvalidState(
                "scheduler has been stopped".to_string(),
            ));
        }
        if self.is_running() {
            return Err(ButlerError::InvalidState(
                "jobs cannot be armed while the scheduler is running".to_string(),
            ));
        }
        if self.jobs.contains_key(&spec.agent) {
            return Err(ButlerError::DuplicateJob(spec.agent));
        }

        let expression =
            CronExpression::parse(&spec.expression).map_err(|e| ButlerError::ScheduleError {
                agent: spec.agent.clone(),
                reason: format!("'{}': {}", spec.expression, e),
            })?;

        if expression.next_after(&self.clock.now()).is_none() {
            return Err(ButlerError::ScheduleError {
                agent: spec.agent.clone(),
                reason: format!("'{}' never fires", spec.expression),
            });
        }

        info!("Scheduled task for {} with cron: '{}'", spec.agent, expression);
        self.jobs.insert(
            spec.agent.clone(),
            Arc::new(ScheduledJob {
                id: spec.agent,
                expression,
                runner: spec.runner,
                in_flight: Arc::new(AtomicBool::new(false)),
            }),
        );
        Ok(())
    }

    /// Arm a batch of jobs. A rejected job does not prevent the others from
    /// arming; the rejections are returned.
    pub fn arm(&mut self, specs: impl IntoIterator<Item = JobSpec>) -> Vec<ButlerError> {
        let mut rejected = Vec::new();
        for spec in specs {
            let agent = spec.agent.clone();
            if let Err(e) = self.add_job(spec) {
                error!("Failed to arm job for agent {}: {}", agent, e);
                rejected.push(e);
            }
        }
        rejected
    }

    /// Start the driver. Returns `false` without starting when no jobs are
    /// armed or the scheduler is already running or stopped.
    pub fn run(&mut self) -> bool {
        if self.stopped {
            warn!("Scheduler has been stopped and cannot be restarted");
            return false;
        }
        if self.is_running() {
            warn!("Scheduler is already running");
            return false;
        }
        if self.jobs.is_empty() {
            warn!("No jobs were scheduled.");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.shutdown_signal = Some(shutdown_tx);

        let jobs: Vec<Arc<ScheduledJob>> = self.jobs.values().cloned().collect();
        let clock = self.clock.clone();
        let grace = self.shutdown_grace;

        info!("Starting scheduler with {} job(s)", jobs.len());
        self.driver_task = Some(tokio::spawn(drive(jobs, clock, shutdown_rx, grace)));
        true
    }

    /// Stop the driver and wait for in-flight invocations (bounded by the
    /// shutdown grace). Safe to call repeatedly or before `run`.
    pub async fn stop(&mut self) {
        self.stopped = true;

        if let Some(shutdown_tx) = self.shutdown_signal.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(task) = self.driver_task.take() {
            if let Err(e) = task.await {
                warn!("Scheduler driver task ended abnormally: {}", e);
            }
            info!("Scheduler stopped");
        } else {
            debug!("Scheduler stop requested but it was not running");
        }
    }

    pub fn is_running(&self) -> bool {
        self.driver_task.is_some()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn has_job(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn jobs(&self) -> Vec<ScheduledJobInfo> {
        let now = self.clock.now();
        self.jobs
            .values()
            .map(|job| ScheduledJobInfo {
                id: job.id.clone(),
                expression: job.expression.to_string(),
                next_run: if self.stopped {
                    None
                } else {
                    job.expression.next_after(&now)
                },
                running: job.in_flight.load(Ordering::Acquire),
            })
            .collect()
    }
}

async fn drive(
    jobs: Vec<Arc<ScheduledJob>>,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: broadcast::Receiver<()>,
    grace: Duration,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let started = clock.now();
    let mut next_runs: Vec<Option<DateTime<Local>>> = jobs
        .iter()
        .map(|job| job.expression.next_after(&started))
        .collect();

    loop {
        let Some(earliest) = next_runs.iter().flatten().min().cloned() else {
            warn!("No armed job has an upcoming fire time, scheduler idling");
            let _ = shutdown_rx.recv().await;
            break;
        };
        let wait = (earliest - clock.now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Scheduler driver received shutdown signal");
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Scheduled invocation ended abnormally: {}", e);
                }
            }
            _ = sleep(wait) => {
                let now = clock.now();
                for (job, next_run) in jobs.iter().zip(next_runs.iter_mut()) {
                    if matches!(next_run, Some(due) if *due <= now) {
                        launch(job, &mut in_flight);
                        *next_run = job.expression.next_after(&now);
                    }
                }
            }
        }
    }

    if in_flight.is_empty() {
        return;
    }

    info!(
        "Waiting up to {:?} for {} in-flight invocation(s)",
        grace,
        in_flight.len()
    );
    let drained = timeout(grace, async {
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Scheduled invocation ended abnormally: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Aborting {} invocation(s) still running after {:?}",
            in_flight.len(),
            grace
        );
        in_flight.shutdown().await;
    }
}

fn launch(job: &Arc<ScheduledJob>, in_flight: &mut JoinSet<()>) {
    if job.in_flight.swap(true, Ordering::AcqRel) {
        warn!(
            "Skipping tick for {}: previous invocation is still running",
            job.id
        );
        return;
    }

    debug!("Launching scheduled invocation for {}", job.id);
    let guard = InFlightGuard(job.in_flight.clone());
    let invocation = (job.runner)();
    in_flight.spawn(async move {
        let _guard = guard;
        invocation.await;
    });
}
