// tests/scheduler.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use snapd::errors::{Result, SnapdError};
use snapd::scheduler::{Job, Scheduler};
use snapd_test_utils::{init_tracing, with_timeout};

type TestResult = std::result::Result<(), Box<dyn Error>>;

const EVERY_SECOND: &str = "* * * * * *";

#[derive(Default)]
struct CountingJob {
    runs: AtomicUsize,
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanickingJob;

#[async_trait]
impl Job for PanickingJob {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        panic!("job blew up");
    }
}

/// Waits for cancellation, then records that it saw it.
#[derive(Default)]
struct CooperativeJob {
    started: AtomicBool,
    saw_cancel: AtomicBool,
}

#[async_trait]
impl Job for CooperativeJob {
    fn name(&self) -> &str {
        "cooperative"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        cancel.cancelled().await;
        self.saw_cancel.store(true, Ordering::SeqCst);
        Err(SnapdError::Cancelled)
    }
}

/// Ignores cancellation entirely.
#[derive(Default)]
struct StubbornJob {
    started: AtomicBool,
}

#[async_trait]
impl Job for StubbornJob {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

async fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[test]
fn invalid_expressions_are_rejected_at_registration() {
    let mut scheduler = Scheduler::new();
    let job = Arc::new(CountingJob::default());

    assert!(scheduler.add_job("0 * * * *", job.clone()).is_err());
    assert!(scheduler.add_job("not a cron", job.clone()).is_err());
    assert_eq!(scheduler.job_count(), 0);

    assert!(scheduler.add_job("0 0 3 * * *", job).is_ok());
    assert_eq!(scheduler.job_count(), 1);
}

#[tokio::test]
async fn jobs_fire_on_schedule() -> TestResult {
    init_tracing();
    let job = Arc::new(CountingJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.add_job(EVERY_SECOND, job.clone())?;
    scheduler.start();

    with_timeout(async {
        while job.runs.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    scheduler.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn panics_are_contained() -> TestResult {
    init_tracing();
    let counter = Arc::new(CountingJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.add_job(EVERY_SECOND, Arc::new(PanickingJob))?;
    scheduler.add_job(EVERY_SECOND, counter.clone())?;
    scheduler.start();

    // The counting job keeps firing after its neighbour has panicked.
    with_timeout(async {
        while counter.runs.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    scheduler.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn stop_cancels_and_waits_for_in_flight_jobs() -> TestResult {
    init_tracing();
    let job = Arc::new(CooperativeJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.add_job(EVERY_SECOND, job.clone())?;
    scheduler.start();

    with_timeout(wait_for(&job.started)).await;
    scheduler.stop(Duration::from_secs(2)).await?;

    assert!(job.saw_cancel.load(Ordering::SeqCst));
    assert!(scheduler.token().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn stop_times_out_on_stubborn_jobs() -> TestResult {
    init_tracing();
    let job = Arc::new(StubbornJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.add_job(EVERY_SECOND, job.clone())?;
    scheduler.start();

    with_timeout(wait_for(&job.started)).await;
    let err = scheduler
        .stop(Duration::from_millis(200))
        .await
        .expect_err("job ignores cancellation");
    assert!(matches!(err, SnapdError::ShutdownTimeout(_)));
    Ok(())
}

#[tokio::test]
async fn stop_without_start_returns_immediately() -> TestResult {
    init_tracing();
    let mut scheduler = Scheduler::new();
    scheduler.add_job(EVERY_SECOND, Arc::new(CountingJob::default()))?;
    with_timeout(scheduler.stop(Duration::from_millis(100))).await?;
    Ok(())
}
