//! Policy layer over the job store: validation, next-run computation,
//! credential stripping on read paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ExecutionOutcome, Job, JobCreate, JobExecution, JobStatus, JobUpdate,
};
use crate::store::JobStore;

/// The slice of the service the runner depends on. A trait so runner tests
/// can substitute an in-memory fake.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn get_jobs_to_run(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        instance_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>>;

    async fn finish_job_execution(
        &self,
        job: &Job,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        outcome: &ExecutionOutcome,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
}

impl JobService {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    pub async fn create_job(&self, create: JobCreate) -> Result<Job> {
        let now = Utc::now();

        let mut job = Job {
            id: Uuid::new_v4(),
            job_type: create.job_type,
            status: JobStatus::New,
            cron_schedule: create.cron_schedule,
            execute_at: create.execute_at,
            next_run: now,
            http_job: create.http_job,
            amqp_job: create.amqp_job,
            tags: create.tags,
            number_of_runs: 0,
            failed_runs: 0,
            allowed_failed_runs: create.allowed_failed_runs.max(0),
            locked_by: None,
            locked_until: None,
            created_at: now,
            updated_at: now,
        };

        job.validate()?;
        job.next_run = job.compute_next_run(now)?;

        let mut created = self.store.create(&job).await?;
        created.remove_credentials();
        Ok(created)
    }

    pub async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<Job> {
        let mut job = self.store.get(id).await?;

        // Switching schedule kind clears the other field so validation sees
        // exactly one of them.
        if let Some(cron) = update.cron_schedule {
            job.cron_schedule = Some(cron);
            if update.execute_at.is_none() {
                job.execute_at = None;
            }
        }
        if let Some(at) = update.execute_at {
            job.execute_at = Some(at);
            job.cron_schedule = None;
        }
        if let Some(http) = update.http_job {
            job.http_job = Some(http);
        }
        if let Some(amqp) = update.amqp_job {
            job.amqp_job = Some(amqp);
        }
        if let Some(tags) = update.tags {
            job.tags = tags;
        }
        if let Some(allowed) = update.allowed_failed_runs {
            job.allowed_failed_runs = allowed.max(0);
        }

        job.validate()?;
        job.next_run = job.compute_next_run(Utc::now())?;

        let mut updated = self.store.update(&job).await?;
        updated.remove_credentials();
        Ok(updated)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        let mut job = self.store.get(id).await?;
        job.remove_credentials();
        Ok(job)
    }

    pub async fn list_jobs(&self, limit: i64, offset: i64, tags: &[String]) -> Result<Vec<Job>> {
        let mut jobs = self.store.list(limit, offset, tags).await?;
        for job in &mut jobs {
            job.remove_credentials();
        }
        Ok(jobs)
    }

    pub async fn delete_job(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn list_executions(
        &self,
        job_id: Uuid,
        only_failed: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>> {
        // 404 on unknown jobs rather than an empty audit trail.
        self.store.get(job_id).await?;
        self.store
            .list_executions(job_id, only_failed, limit, offset)
            .await
    }
}

#[async_trait]
impl ExecutionService for JobService {
    async fn get_jobs_to_run(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        instance_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>> {
        self.store
            .get_jobs_to_run(now, locked_until, instance_id, limit)
            .await
    }

    async fn finish_job_execution(
        &self,
        job: &Job,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        outcome: &ExecutionOutcome,
    ) -> Result<()> {
        self.store
            .finish_job_execution(job, start_time, stop_time, outcome)
            .await
    }
}
