// src/scheduler/mod.rs

//! Cron-driven job dispatcher.
//!
//! Every registered `(schedule, job)` pair gets a ticker task. On each fire
//! the ticker launches the job in its own task, so slow runs may overlap
//! with later ones. Job tasks are wrapped in a panic boundary and tracked so
//! [`Scheduler::stop`] can wait for them.

pub mod cron;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SnapdError};

pub use self::cron::parse_schedule;

/// A unit of work fired by the scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Run one tick. `cancel` fires when the scheduler is stopping.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

struct Entry {
    expr: String,
    schedule: ::cron::Schedule,
    job: Arc<dyn Job>,
}

pub struct Scheduler {
    entries: Vec<Arc<Entry>>,
    root: CancellationToken,
    tracker: TaskTracker,
    started: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
        }
    }

    /// Register `job` to fire on `expr`. Invalid expressions are rejected
    /// here, never at fire time.
    pub fn add_job(&mut self, expr: &str, job: Arc<dyn Job>) -> Result<()> {
        let schedule = parse_schedule(expr)?;
        let entry = Arc::new(Entry {
            expr: expr.to_string(),
            schedule,
            job,
        });
        debug!(job = entry.job.name(), schedule = %entry.expr, "job registered");

        if self.started {
            self.spawn_ticker(entry.clone());
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.entries.len()
    }

    /// Token cancelled by [`Scheduler::stop`].
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Begin firing registered jobs.
    pub fn start(&mut self) {
        if self.started {
            warn!("scheduler already started");
            return;
        }
        self.started = true;
        for entry in &self.entries {
            self.spawn_ticker(entry.clone());
        }
        info!(jobs = self.entries.len(), "scheduler started");
    }

    /// Stop firing, cancel running jobs, and wait for them to return.
    ///
    /// Returns [`SnapdError::ShutdownTimeout`] if jobs are still running
    /// after `timeout`; they keep running in the background.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        info!("stopping scheduler");
        self.root.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("scheduler stopped");
                Ok(())
            }
            Err(_) => {
                warn!(remaining = self.tracker.len(), ?timeout, "scheduler stop timed out");
                Err(SnapdError::ShutdownTimeout(timeout))
            }
        }
    }

    fn spawn_ticker(&self, entry: Arc<Entry>) {
        let root = self.root.clone();
        let tracker = self.tracker.clone();
        self.tracker.spawn(tick_loop(entry, root, tracker));
    }
}

async fn tick_loop(entry: Arc<Entry>, root: CancellationToken, tracker: TaskTracker) {
    let mut previous = None;
    loop {
        let Some(next) = cron::next_fire(&entry.schedule, previous, Utc::now()) else {
            debug!(job = entry.job.name(), "schedule has no further fire times");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = root.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        previous = Some(next);
        launch(&entry, &root, &tracker);
    }
}

fn launch(entry: &Entry, root: &CancellationToken, tracker: &TaskTracker) {
    let job = entry.job.clone();
    let cancel = root.child_token();

    tracker.spawn(async move {
        let name = job.name().to_string();
        debug!(job = %name, "job fired");

        match AssertUnwindSafe(job.run(cancel)).catch_unwind().await {
            Ok(Ok(())) => debug!(job = %name, "job finished"),
            Ok(Err(err)) if err.is_cancelled() => debug!(job = %name, "job cancelled"),
            Ok(Err(err)) => error!(job = %name, error = %err, "job failed"),
            Err(panic) => error!(job = %name, panic = %panic_message(&*panic), "job panicked"),
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
