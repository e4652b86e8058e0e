//! Recurrence controller — named jobs that re-run a dispatch pass on a
//! schedule until the pass reports nothing left to do.
//!
//! Every running job owns one tokio task. Ticks of a job are strictly
//! sequential: the next wait starts only after the previous work returns.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use futures::future::BoxFuture;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::types::DispatchRun;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::cron::CronExpression;

/// One pass of recurring work.
pub type WorkFn = Arc<dyn Fn() -> BoxFuture<'static, Result<DispatchRun>> + Send + Sync>;

/// Called once when a job stops itself.
pub type AutoStopFn = Arc<dyn Fn() + Send + Sync>;

const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed period; the first tick comes one period after start.
    Every(Duration),
    Cron { expression: CronExpression, tz: Tz },
}

impl Schedule {
    pub fn every_minutes(minutes: u64) -> Result<Self> {
        if minutes == 0 {
            return Err(RowcastError::config("interval must be at least one minute"));
        }
        let secs = minutes
            .checked_mul(60)
            .ok_or_else(|| RowcastError::config(format!("interval of {minutes} minutes is too large")))?;
        Ok(Schedule::Every(Duration::from_secs(secs)))
    }

    pub fn cron(expression: &str, tz: Tz) -> Result<Self> {
        Ok(Schedule::Cron {
            expression: CronExpression::parse(expression)?,
            tz,
        })
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Every(period) => write!(f, "every {}s", period.as_secs()),
            Schedule::Cron { expression, tz } => write!(f, "cron '{expression}' ({tz})"),
        }
    }
}

/// Time from `now` until the next cron fire, if there is one.
pub fn delay_until_next(expression: &CronExpression, tz: Tz, now: DateTime<Utc>) -> Option<Duration> {
    let next = expression.next_after(now.with_timezone(&tz))?;
    (next.with_timezone(&Utc) - now).to_std().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Stopped,
    Running,
}

struct Job {
    schedule: Schedule,
    work: WorkFn,
    on_auto_stop: Option<AutoStopFn>,
    state: JobState,
    /// Start counter value of the task currently owning this job.
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Job {
    fn halt(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        self.state = JobState::Stopped;
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, Job>,
    starts: u64,
}

#[derive(Default)]
pub struct RecurrenceController {
    registry: Arc<Mutex<Registry>>,
}

impl RecurrenceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `work` under `id` and start it. A job already registered
    /// under the same id is stopped and replaced.
    pub fn register(
        &self,
        id: &str,
        schedule: Schedule,
        work: WorkFn,
        on_auto_stop: Option<AutoStopFn>,
    ) -> Result<()> {
        {
            let mut registry = lock(&self.registry);
            if let Some(mut previous) = registry.jobs.remove(id) {
                previous.halt();
                tracing::info!("Job '{id}' replaced");
            }
            registry.jobs.insert(
                id.to_string(),
                Job {
                    schedule,
                    work,
                    on_auto_stop,
                    state: JobState::Stopped,
                    generation: 0,
                    stop_tx: None,
                },
            );
        }
        self.start(id)
    }

    /// Start a stopped job. Starting a running job does nothing.
    pub fn start(&self, id: &str) -> Result<()> {
        let mut guard = lock(&self.registry);
        let registry = &mut *guard;
        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| RowcastError::JobNotFound(id.to_string()))?;
        if job.state == JobState::Running {
            return Ok(());
        }

        registry.starts += 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        job.generation = registry.starts;
        job.state = JobState::Running;
        job.stop_tx = Some(stop_tx);

        tracing::info!("Job '{id}' started ({})", job.schedule);
        tokio::spawn(run_job(
            Arc::clone(&self.registry),
            id.to_string(),
            job.generation,
            job.schedule.clone(),
            Arc::clone(&job.work),
            stop_rx,
        ));
        Ok(())
    }

    /// Stop a job. An in-flight pass finishes, but no further tick fires
    /// and the auto-stop callback is not invoked.
    pub fn stop(&self, id: &str) -> Result<()> {
        let mut registry = lock(&self.registry);
        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| RowcastError::JobNotFound(id.to_string()))?;
        if job.state == JobState::Running {
            job.halt();
            tracing::info!("Job '{id}' stopped");
        }
        Ok(())
    }

    pub fn start_all(&self) {
        for id in self.job_ids() {
            if let Err(e) = self.start(&id) {
                tracing::warn!("Could not start job '{id}': {e}");
            }
        }
    }

    pub fn stop_all(&self) {
        let mut registry = lock(&self.registry);
        for job in registry.jobs.values_mut() {
            job.halt();
        }
    }

    pub fn state(&self, id: &str) -> Option<JobState> {
        lock(&self.registry).jobs.get(id).map(|job| job.state)
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.registry).jobs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for RecurrenceController {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mark the job stopped if `generation` still owns it, handing back the
/// auto-stop callback.
fn finish(registry: &Mutex<Registry>, id: &str, generation: u64) -> Option<AutoStopFn> {
    let mut registry = lock(registry);
    let job = registry.jobs.get_mut(id)?;
    if job.generation != generation || job.state != JobState::Running {
        return None;
    }
    job.stop_tx = None;
    job.state = JobState::Stopped;
    job.on_auto_stop.clone()
}

/// Releases the job when its task exits for any reason, so a dead task
/// never leaves the job marked running.
struct ExitGuard {
    registry: Arc<Mutex<Registry>>,
    id: String,
    generation: u64,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        finish(&self.registry, &self.id, self.generation);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

enum Ticker {
    Every(Interval),
    Cron {
        expression: CronExpression,
        tz: Tz,
        last: Option<DateTime<Utc>>,
    },
}

impl Ticker {
    fn new(schedule: &Schedule) -> Self {
        match schedule {
            Schedule::Every(period) => {
                let period = (*period).max(MIN_PERIOD);
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Every(interval)
            }
            Schedule::Cron { expression, tz } => Ticker::Cron {
                expression: expression.clone(),
                tz: *tz,
                last: None,
            },
        }
    }

    /// Wait for the next fire. `false` when the schedule never fires again.
    async fn tick(&mut self) -> bool {
        match self {
            Ticker::Every(interval) => {
                interval.tick().await;
                true
            }
            Ticker::Cron { expression, tz, last } => {
                let now = Utc::now();
                let from = last.map_or(now, |l| l.max(now));
                let Some(wait) = delay_until_next(expression, *tz, from) else {
                    return false;
                };
                let wait = wait + (from - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                *last = chrono::Duration::from_std(wait).ok().map(|wait| now + wait);
                true
            }
        }
    }
}

async fn run_job(
    registry: Arc<Mutex<Registry>>,
    id: String,
    generation: u64,
    schedule: Schedule,
    work: WorkFn,
    mut stop_rx: watch::Receiver<bool>,
) {
    let _guard = ExitGuard {
        registry: Arc::clone(&registry),
        id: id.clone(),
        generation,
    };
    let mut ticker = Ticker::new(&schedule);
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            fired = ticker.tick() => {
                if !fired {
                    tracing::warn!("Job '{id}': {schedule} has no future fire time");
                    break;
                }
            }
        }

        let outcome = match AssertUnwindSafe(async { work().await }).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                tracing::error!("Job '{id}' tick panicked: {}", panic_message(payload.as_ref()));
                continue;
            }
        };

        match outcome {
            Ok(run) if run.should_stop_recurrence => {
                tracing::info!("Job '{id}': no scheduled messages remain, stopping");
                if let Some(on_auto_stop) = finish(&registry, &id, generation) {
                    on_auto_stop();
                }
                break;
            }
            Ok(run) => tracing::info!(
                "Job '{id}' tick: sent {}, failed {}, skipped {}, remaining {}",
                run.sent,
                run.failed,
                run.skipped,
                run.reported_remaining()
            ),
            Err(RowcastError::Busy(_)) => {
                tracing::debug!("Job '{id}': previous pass still running, tick skipped")
            }
            Err(e) => tracing::error!("Job '{id}' tick failed: {e}"),
        }

        if *stop_rx.borrow() {
            break;
        }
    }
    tracing::debug!("Job '{id}' task exited");
}
