//! Persistent job repository.
//!
//! All mutation happens through transactions holding row locks; secret
//! fields cross this boundary encrypted (see [`crate::crypto`]).

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto;
use crate::error::{Error, Result};
use crate::model::{AmqpJob, ExecutionOutcome, HttpJob, Job, JobExecution};

const JOB_COLUMNS: &str = "id, job_type, status, cron_schedule, execute_at, next_run, \
     http_job, amqp_job, tags, number_of_runs, failed_runs, allowed_failed_runs, \
     locked_by, locked_until, created_at, updated_at";

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    cron_schedule: Option<String>,
    execute_at: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    http_job: Option<Json<HttpJob>>,
    amqp_job: Option<Json<AmqpJob>>,
    tags: Vec<String>,
    number_of_runs: i32,
    failed_runs: i32,
    allowed_failed_runs: i32,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let mut http_job = self.http_job.map(|j| j.0);
        let mut amqp_job = self.amqp_job.map(|j| j.0);

        if let Some(http) = http_job.as_mut() {
            decrypt_http_secrets(http)?;
        }
        if let Some(amqp) = amqp_job.as_mut() {
            amqp.connection = crypto::encryptor()?.decrypt(&amqp.connection)?;
        }

        Ok(Job {
            id: self.id,
            job_type: self.job_type.parse()?,
            status: self.status.parse()?,
            cron_schedule: self.cron_schedule,
            execute_at: self.execute_at,
            next_run: self.next_run,
            http_job,
            amqp_job,
            tags: self.tags,
            number_of_runs: self.number_of_runs,
            failed_runs: self.failed_runs,
            allowed_failed_runs: self.allowed_failed_runs,
            locked_by: self.locked_by,
            locked_until: self.locked_until,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn decrypt_http_secrets(http: &mut HttpJob) -> Result<()> {
    let enc = crypto::encryptor()?;
    if let Some(password) = http.auth.password.take() {
        http.auth.password = Some(enc.decrypt(&password)?);
    }
    if let Some(token) = http.auth.bearer_token.take() {
        http.auth.bearer_token = Some(enc.decrypt(&token)?);
    }
    Ok(())
}

/// Payload copies with secret fields replaced by ciphertext, ready for
/// jsonb storage.
fn encrypted_payloads(job: &Job) -> Result<(Option<Json<HttpJob>>, Option<Json<AmqpJob>>)> {
    let enc = crypto::encryptor()?;

    let http = job
        .http_job
        .as_ref()
        .map(|http| {
            let mut http = http.clone();
            if let Some(password) = http.auth.password.take() {
                http.auth.password = Some(enc.encrypt(&password)?);
            }
            if let Some(token) = http.auth.bearer_token.take() {
                http.auth.bearer_token = Some(enc.encrypt(&token)?);
            }
            Ok::<_, Error>(Json(http))
        })
        .transpose()?;

    let amqp = job
        .amqp_job
        .as_ref()
        .map(|amqp| {
            let mut amqp = amqp.clone();
            amqp.connection = enc.encrypt(&amqp.connection)?;
            Ok::<_, Error>(Json(amqp))
        })
        .transpose()?;

    Ok((http, amqp))
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // CRUD
    // ----------------------------

    pub async fn create(&self, job: &Job) -> Result<Job> {
        let (http, amqp) = encrypted_payloads(job)?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (
                id, job_type, status, cron_schedule, execute_at, next_run,
                http_job, amqp_job, tags,
                number_of_runs, failed_runs, allowed_failed_runs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, $10)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.cron_schedule)
        .bind(job.execute_at)
        .bind(job.next_run)
        .bind(http)
        .bind(amqp)
        .bind(&job.tags)
        .bind(job.allowed_failed_runs)
        .fetch_one(&self.pool)
        .await?;

        row.into_job()
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::JobNotFound(id))?;

        row.into_job()
    }

    pub async fn list(&self, limit: i64, offset: i64, tags: &[String]) -> Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);

        let rows = if tags.is_empty() {
            sqlx::query_as::<_, JobRow>(&format!(
                r#"
                SELECT {JOB_COLUMNS}
                FROM jobs
                ORDER BY created_at DESC, id DESC
                LIMIT $1 OFFSET $2
                "#
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, JobRow>(&format!(
                r#"
                SELECT {JOB_COLUMNS}
                FROM jobs
                WHERE tags && $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2 OFFSET $3
                "#
            ))
            .bind(tags)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub async fn update(&self, job: &Job) -> Result<Job> {
        let (http, amqp) = encrypted_payloads(job)?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET cron_schedule = $2,
                execute_at = $3,
                next_run = $4,
                http_job = $5,
                amqp_job = $6,
                tags = $7,
                allowed_failed_runs = $8,
                status = $9,
                updated_at = now()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(&job.cron_schedule)
        .bind(job.execute_at)
        .bind(job.next_run)
        .bind(http)
        .bind(amqp)
        .bind(&job.tags)
        .bind(job.allowed_failed_runs)
        .bind(job.status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::JobNotFound(job.id))?;

        row.into_job()
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    // ----------------------------
    // Leasing
    // ----------------------------

    /// Atomically lease up to `limit` due jobs for `instance_id`.
    ///
    /// A job is eligible when it is NEW or RUNNING with an expired (or
    /// absent) lease, due at `now`, and still inside its failure allowance.
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent callers from blocking on
    /// each other or double-leasing a row.
    pub async fn get_jobs_to_run(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        instance_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM jobs
            WHERE status IN ('NEW', 'RUNNING')
              AND next_run <= $1
              AND (locked_by IS NULL OR locked_until < $1)
              AND failed_runs <= allowed_failed_runs
            ORDER BY next_run ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'RUNNING',
                locked_by = $2,
                locked_until = $3,
                updated_at = now()
            WHERE id = ANY($1)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&ids)
        .bind(instance_id)
        .bind(locked_until)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut jobs = rows
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| (j.next_run, j.id));
        Ok(jobs)
    }

    // ----------------------------
    // Finalization
    // ----------------------------

    /// Record the outcome of a leased job and release the lease.
    ///
    /// Canceled runs (shutdown preempted the executor) release the lease
    /// and record nothing, so the job redrives untouched.
    pub async fn finish_job_execution(
        &self,
        job: &Job,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        outcome: &ExecutionOutcome,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if matches!(outcome, ExecutionOutcome::Canceled) {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'NEW',
                    locked_by = NULL,
                    locked_until = NULL,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(());
        }

        let success = matches!(outcome, ExecutionOutcome::Success);

        sqlx::query(
            r#"
            INSERT INTO job_executions (id, job_id, start_time, stop_time, success, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.id)
        .bind(start_time)
        .bind(stop_time)
        .bind(success)
        .bind(outcome.error_message())
        .execute(&mut *tx)
        .await?;

        let schedule = job.schedule()?;
        let next_run = schedule
            .map(|s| s.next_after(stop_time))
            .transpose()?;

        if success {
            match next_run {
                // Cron: back in rotation at the next tick of the expression.
                Some(next) => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = 'NEW',
                            next_run = $2,
                            locked_by = NULL,
                            locked_until = NULL,
                            number_of_runs = number_of_runs + 1,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(next)
                    .execute(&mut *tx)
                    .await?;
                }
                // One-shot: done for good.
                None => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = 'COMPLETED',
                            locked_by = NULL,
                            locked_until = NULL,
                            number_of_runs = number_of_runs + 1,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        } else {
            // Failure: burn allowance. Cron jobs move to the next tick;
            // one-shots keep next_run (<= now) so the next tick retries
            // them until the allowance is exhausted.
            match next_run {
                Some(next) => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = CASE
                                WHEN failed_runs + 1 > allowed_failed_runs THEN 'FAILED'
                                ELSE 'NEW'
                            END,
                            next_run = $2,
                            locked_by = NULL,
                            locked_until = NULL,
                            number_of_runs = number_of_runs + 1,
                            failed_runs = failed_runs + 1,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(next)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = CASE
                                WHEN failed_runs + 1 > allowed_failed_runs THEN 'FAILED'
                                ELSE 'NEW'
                            END,
                            locked_by = NULL,
                            locked_until = NULL,
                            number_of_runs = number_of_runs + 1,
                            failed_runs = failed_runs + 1,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // ----------------------------
    // Execution audit
    // ----------------------------

    pub async fn list_executions(
        &self,
        job_id: Uuid,
        only_failed: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>> {
        let limit = limit.clamp(1, 500);

        let rows = if only_failed {
            sqlx::query_as::<_, JobExecution>(
                r#"
                SELECT id, job_id, start_time, stop_time, success, error_message
                FROM job_executions
                WHERE job_id = $1 AND success = false
                ORDER BY start_time DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(job_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, JobExecution>(
                r#"
                SELECT id, job_id, start_time, stop_time, success, error_message
                FROM job_executions
                WHERE job_id = $1
                ORDER BY start_time DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(job_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows)
    }
}
