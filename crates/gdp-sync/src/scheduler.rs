//! Run slot, cadences, and the discovery scheduler that owns both.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Utc, Weekday};
use gdp_core::RunStats;
use gdp_storage::{StateError, StateStore, RUN_STATS_FILE};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// One scrape + sync pass. Returns the number of grants discovered.
#[async_trait]
pub trait DiscoveryJob: Send + Sync {
    async fn run_once(&self) -> Result<usize>;
}

/// Atomic test-and-set lock for discovery runs.
#[derive(Debug, Default)]
pub struct RunSlot {
    running: AtomicBool,
    idle: Notify,
}

/// Held for the duration of a run; dropping it frees the slot, also on error or panic.
#[derive(Debug)]
pub struct RunGuard<'a> {
    slot: &'a RunSlot,
}

impl RunSlot {
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { slot: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
        self.slot.idle.notify_waiters();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { grants: usize },
    Failed { error: String },
    /// Another run held the slot.
    Skipped,
}

/// When scheduled runs fire. All hours are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Interval { hours: u32 },
    Daily { hour: u32 },
    Weekly { weekday: Weekday, hour: u32 },
}

impl Cadence {
    pub fn interval() -> Self {
        Cadence::Interval { hours: 6 }
    }

    pub fn daily() -> Self {
        Cadence::Daily { hour: 9 }
    }

    pub fn weekly() -> Self {
        Cadence::Weekly {
            weekday: Weekday::Mon,
            hour: 9,
        }
    }

    /// Six-field cron expression (seconds first) for the job scheduler.
    pub fn cron_expression(&self) -> String {
        match *self {
            Cadence::Interval { hours } => format!("0 0 */{} * * *", hours.clamp(1, 23)),
            Cadence::Daily { hour } => format!("0 0 {} * * *", hour.min(23)),
            Cadence::Weekly { weekday, hour } => format!("0 0 {} * * {weekday}", hour.min(23)),
        }
    }

    /// First fire time strictly after `now`, matching `cron_expression`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours: Vec<u32> = match *self {
            Cadence::Interval { hours } => (0..24).step_by(hours.clamp(1, 23) as usize).collect(),
            Cadence::Daily { hour } | Cadence::Weekly { hour, .. } => vec![hour.min(23)],
        };
        let today = now.date_naive();
        for offset in 0..=7u64 {
            let day = today.checked_add_days(Days::new(offset))?;
            if let Cadence::Weekly { weekday, .. } = self {
                if day.weekday() != *weekday {
                    continue;
                }
            }
            for &hour in &hours {
                let candidate = day.and_hms_opt(hour, 0, 0)?.and_utc();
                if candidate > now {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Interval { hours } => write!(f, "every {hours}h"),
            Cadence::Daily { hour } => write!(f, "daily at {hour:02}:00 UTC"),
            Cadence::Weekly { weekday, hour } => write!(f, "weekly on {weekday} at {hour:02}:00 UTC"),
        }
    }
}

/// Scheduler section of the status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub stats: RunStats,
    pub is_running: bool,
    pub cadence: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Persisted counters for processes that are not running the scheduler
/// themselves. A missing file reads as zeroed stats.
pub async fn load_run_stats(state: &StateStore) -> Result<RunStats, StateError> {
    Ok(state.load_json(RUN_STATS_FILE).await?.unwrap_or_default())
}

struct SchedulerInner {
    job: Arc<dyn DiscoveryJob>,
    state: StateStore,
    slot: RunSlot,
    stats: Mutex<RunStats>,
    cadence: StdMutex<Option<Cadence>>,
    cron: Mutex<Option<JobScheduler>>,
}

/// Owns the run slot and the cumulative run statistics.
#[derive(Clone)]
pub struct DiscoveryScheduler {
    inner: Arc<SchedulerInner>,
}

impl DiscoveryScheduler {
    /// Restores persisted run statistics; unreadable stats start from zero.
    pub async fn new(job: Arc<dyn DiscoveryJob>, state: StateStore) -> Self {
        let stats = match load_run_stats(&state).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "could not restore run stats, starting from zero");
                RunStats::default()
            }
        };
        Self {
            inner: Arc::new(SchedulerInner {
                job,
                state,
                slot: RunSlot::default(),
                stats: Mutex::new(stats),
                cadence: StdMutex::new(None),
                cron: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot.is_running()
    }

    pub async fn stats(&self) -> RunStats {
        self.inner.stats.lock().await.clone()
    }

    pub fn cadence(&self) -> Option<Cadence> {
        self.inner.cadence.lock().ok().and_then(|c| *c)
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let cadence = self.cadence();
        SchedulerSnapshot {
            stats: self.stats().await,
            is_running: self.is_running(),
            cadence: cadence.map(|c| c.to_string()),
            next_run: cadence.and_then(|c| c.next_after(Utc::now())),
        }
    }

    /// Runs discovery now unless a run is already in flight.
    pub async fn trigger_run(&self) -> RunOutcome {
        let Some(_guard) = self.inner.slot.try_acquire() else {
            info!("discovery run already in progress, trigger ignored");
            return RunOutcome::Skipped;
        };

        let run_number = self.inner.stats.lock().await.total_runs + 1;
        let span = info_span!("discovery_run", run = run_number);
        async {
            info!("discovery run started");
            // spawned so a panicking job becomes a failed run instead of unwinding the scheduler
            let job = self.inner.job.clone();
            let result = match tokio::spawn(async move { job.run_once().await }).await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow::anyhow!("discovery run aborted: {join_err}")),
            };

            let finished_at = Utc::now();
            let mut stats = self.inner.stats.lock().await;
            let outcome = match result {
                Ok(grants) => {
                    stats.record_success(grants, finished_at);
                    info!(grants, "discovery run completed");
                    RunOutcome::Completed { grants }
                }
                Err(err) => {
                    stats.record_failure(finished_at);
                    let message = format!("{err:#}");
                    error!(error = %message, "discovery run failed");
                    RunOutcome::Failed { error: message }
                }
            };
            if let Err(err) = self.inner.state.save_json(RUN_STATS_FILE, &*stats).await {
                warn!(error = %err, "could not persist run stats");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Registers the recurring job, then performs the eager initial run.
    pub async fn start(&self, cadence: Cadence) -> Result<RunOutcome> {
        {
            let mut cron = self.inner.cron.lock().await;
            if cron.is_some() {
                bail!("discovery scheduler is already started");
            }

            let sched = JobScheduler::new().await.context("creating job scheduler")?;
            let expression = cadence.cron_expression();
            let this = self.clone();
            let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
                let this = this.clone();
                Box::pin(async move {
                    let outcome = this.trigger_run().await;
                    debug!(?outcome, "scheduled discovery run finished");
                })
            })
            .with_context(|| format!("creating scheduler job for cron {expression}"))?;
            sched.add(job).await.context("adding scheduler job")?;
            sched.start().await.context("starting job scheduler")?;
            *cron = Some(sched);
        }
        if let Ok(mut slot) = self.inner.cadence.lock() {
            *slot = Some(cadence);
        }
        info!(%cadence, next_run = ?cadence.next_after(Utc::now()), "discovery scheduler started");

        Ok(self.trigger_run().await)
    }

    /// `start`, then serve until `stop` flips to `true` or its sender goes
    /// away, then `shutdown`. Returns the outcome of the eager run.
    pub async fn run_until_stopped(&self, cadence: Cadence, mut stop: watch::Receiver<bool>) -> Result<RunOutcome> {
        let first = self.start(cadence).await?;
        info!(outcome = ?first, "initial discovery run finished");
        let _ = stop.wait_for(|stop| *stop).await;
        info!("shutdown requested");
        self.shutdown().await?;
        Ok(first)
    }

    /// Stops the recurring job, waits for an in-flight run, and flushes stats.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut sched) = self.inner.cron.lock().await.take() {
            sched.shutdown().await.context("stopping job scheduler")?;
        }
        if let Ok(mut slot) = self.inner.cadence.lock() {
            *slot = None;
        }
        if self.is_running() {
            info!("waiting for the in-flight discovery run to finish");
        }
        self.inner.slot.wait_until_idle().await;

        let stats = self.stats().await;
        self.inner
            .state
            .save_json(RUN_STATS_FILE, &stats)
            .await
            .context("flushing run stats")?;
        info!(total_runs = stats.total_runs, "discovery scheduler stopped");
        Ok(())
    }
}
