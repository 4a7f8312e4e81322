//! Executors turn a leased job into its side effect.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{Job, JobType};

pub mod amqp;
pub mod http;
pub mod retry;

pub use retry::with_retry;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Produce the job's side effect. Must observe `ctx` so shutdown can
    /// abort long-running work.
    async fn execute(&self, ctx: &CancellationToken, job: &Job) -> Result<()>;
}

/// Executor decorator. Options passed to the factory are applied
/// outermost-first: `&[with_retry]` yields retry(wrapping(inner)).
pub type ExecutorOption = fn(Box<dyn Executor>) -> Box<dyn Executor>;

pub trait ExecutorFactory: Send + Sync {
    fn new_executor(&self, job: &Job, opts: &[ExecutorOption]) -> Result<Box<dyn Executor>>;
}

/// Default factory: one shared HTTP client, one AMQP connection cache.
pub struct Factory {
    http_client: reqwest::Client,
    amqp_connections: amqp::ConnectionCache,
}

impl Factory {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            amqp_connections: amqp::ConnectionCache::default(),
        }
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorFactory for Factory {
    fn new_executor(&self, job: &Job, opts: &[ExecutorOption]) -> Result<Box<dyn Executor>> {
        let executor: Box<dyn Executor> = match job.job_type {
            JobType::Http => Box::new(http::HttpExecutor::new(self.http_client.clone())),
            JobType::Amqp => Box::new(amqp::AmqpExecutor::new(self.amqp_connections.clone())),
        };

        Ok(opts.iter().rev().fold(executor, |inner, opt| opt(inner)))
    }
}
