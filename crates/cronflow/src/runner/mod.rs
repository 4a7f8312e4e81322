//! The per-process control loop: lease due jobs on every tick, dispatch
//! them to a bounded worker pool, report outcomes, drain on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunnerSettings;
use crate::executor::{with_retry, ExecutorFactory};
use crate::model::{ExecutionOutcome, Job};
use crate::service::ExecutionService;

pub mod metrics;

pub use metrics::RunnerMetrics;

/// Bounds a stuck store so it cannot block the ticker indefinitely.
const LEASE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Finalization runs detached from the shutdown token, under this deadline.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Runner {
    inner: Arc<Inner>,
    started: AtomicBool,
    control: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    service: Arc<dyn ExecutionService>,
    factory: Arc<dyn ExecutorFactory>,
    metrics: Arc<RunnerMetrics>,

    instance_id: String,
    interval: Duration,
    max_concurrent_jobs: usize,
    max_job_lock_time: chrono::Duration,

    /// Worker slots; dispatch blocks when the pool is full.
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(
        settings: RunnerSettings,
        service: Arc<dyn ExecutionService>,
        factory: Arc<dyn ExecutorFactory>,
        metrics: Arc<RunnerMetrics>,
    ) -> Self {
        let max_job_lock_time = chrono::Duration::from_std(settings.max_job_lock_time)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        Self {
            inner: Arc::new(Inner {
                service,
                factory,
                metrics,
                instance_id: settings.instance_id,
                interval: settings.interval,
                max_concurrent_jobs: settings.max_concurrent_jobs,
                max_job_lock_time,
                semaphore: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
                shutdown: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            control: Mutex::new(None),
        }
    }

    /// Spawn the control loop. Safe to call repeatedly; only the first call
    /// starts anything.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run().await });

        if let Ok(mut control) = self.control.lock() {
            *control = Some(handle);
        }
    }

    /// Stop the ticker and wait for inflight jobs, up to `timeout`
    /// (default 10 s). On timeout the jobs keep running in the background;
    /// their leases expire and another runner picks them up.
    pub async fn stop(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_STOP_TIMEOUT);

        self.inner.shutdown.cancel();

        let handle = self.control.lock().ok().and_then(|mut c| c.take());
        let Some(handle) = handle else { return };

        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => info!("runner stopped"),
            Err(_) => warn!("timeout while stopping the runner"),
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_due_jobs().await,
                _ = self.shutdown.cancelled() => break,
            }
        }

        // Every inflight worker holds a permit; acquiring the full pool is
        // the wait-for-all.
        let _ = self
            .semaphore
            .acquire_many(self.max_concurrent_jobs as u32)
            .await;
    }

    async fn run_due_jobs(self: &Arc<Self>) {
        let now = Utc::now();
        let locked_until = now + self.max_job_lock_time;

        let leased = tokio::time::timeout(
            LEASE_QUERY_TIMEOUT,
            self.service.get_jobs_to_run(
                now,
                locked_until,
                &self.instance_id,
                self.max_concurrent_jobs as i64,
            ),
        )
        .await;

        // Store trouble never kills the runner; the next tick retries.
        let jobs = match leased {
            Ok(Ok(jobs)) => jobs,
            Ok(Err(e)) => {
                error!(error = %e, "failed to get jobs to run");
                return;
            }
            Err(_) => {
                error!("timed out getting jobs to run");
                return;
            }
        };

        let batch = jobs.len() as i64;
        self.metrics.add_jobs_in_execution(batch);

        debug!(count = batch, "running jobs");

        for job in jobs {
            self.dispatch(job).await;
        }

        self.metrics.sub_jobs_in_execution(batch);
    }

    /// Blocks on a worker slot before spawning: dispatch backpressure is
    /// what caps inflight work at `max_concurrent_jobs`.
    async fn dispatch(self: &Arc<Self>, job: Job) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let inner = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            inner.execute_job(job).await;
        });
    }

    async fn execute_job(&self, job: Job) {
        debug!(job_id = %job.id, "executing job");

        let executor = match self.factory.new_executor(&job, &[with_retry]) {
            Ok(executor) => executor,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to create job executor");
                return;
            }
        };

        let start_time = Utc::now();
        let result = executor.execute(&self.shutdown, &job).await;
        let stop_time = Utc::now();

        self.metrics
            .record_job_duration((stop_time - start_time).to_std().unwrap_or_default());

        let outcome = ExecutionOutcome::from_result(&result);
        if matches!(outcome, ExecutionOutcome::Failed(_)) {
            self.metrics.increase_failed_job_count();
        }

        // Failure to record is logged, not propagated: the lease expires
        // and some runner re-leases the job.
        let finalize =
            self.service
                .finish_job_execution(&job, start_time, stop_time, &outcome);
        match tokio::time::timeout(FINALIZE_TIMEOUT, finalize).await {
            Ok(Ok(())) => debug!(job_id = %job.id, "job finished"),
            Ok(Err(e)) => {
                error!(job_id = %job.id, error = %e, "failed to report job as finished")
            }
            Err(_) => error!(job_id = %job.id, "timed out reporting job as finished"),
        }
    }
}
