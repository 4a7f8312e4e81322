//! In-process runner metrics, rendered as minimal Prometheus text
//! (no extra crate needed).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RunnerMetrics {
    jobs_in_execution: AtomicI64,
    failed_job_total: AtomicU64,
    job_duration_micros_sum: AtomicU64,
    job_duration_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub jobs_in_execution: i64,
    pub failed_job_total: u64,
    pub job_duration_seconds_sum: f64,
    pub job_duration_count: u64,
}

impl RunnerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_jobs_in_execution(&self, n: i64) {
        self.jobs_in_execution.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub_jobs_in_execution(&self, n: i64) {
        self.jobs_in_execution.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn increase_failed_job_count(&self) {
        self.failed_job_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_duration(&self, duration: Duration) {
        self.job_duration_micros_sum
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.job_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_in_execution: self.jobs_in_execution.load(Ordering::Relaxed),
            failed_job_total: self.failed_job_total.load(Ordering::Relaxed),
            job_duration_seconds_sum: self.job_duration_micros_sum.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
            job_duration_count: self.job_duration_count.load(Ordering::Relaxed),
        }
    }

    pub fn render_prometheus(&self, instance_id: &str) -> String {
        let snap = self.snapshot();
        format!(
            concat!(
                "# HELP scheduler_jobs_in_execution Jobs currently leased by this runner\n",
                "# TYPE scheduler_jobs_in_execution gauge\n",
                "scheduler_jobs_in_execution{{instance=\"{id}\"}} {in_exec}\n",
                "# HELP scheduler_failed_job_total Jobs whose execution ended in an error\n",
                "# TYPE scheduler_failed_job_total counter\n",
                "scheduler_failed_job_total{{instance=\"{id}\"}} {failed}\n",
                "# HELP scheduler_job_duration_seconds Total execution time of finished jobs\n",
                "# TYPE scheduler_job_duration_seconds summary\n",
                "scheduler_job_duration_seconds_sum{{instance=\"{id}\"}} {dur_sum}\n",
                "scheduler_job_duration_seconds_count{{instance=\"{id}\"}} {dur_count}\n",
            ),
            id = instance_id,
            in_exec = snap.jobs_in_execution,
            failed = snap.failed_job_total,
            dur_sum = snap.job_duration_seconds_sum,
            dur_count = snap.job_duration_count,
        )
    }
}
