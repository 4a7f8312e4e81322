use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::Job;

use super::Executor;

/// Retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub jitter_pct: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            jitter_pct: 0.20,
        }
    }
}

/// Wrap an executor with exponential-backoff retry. The standard option
/// handed to the factory.
pub fn with_retry(inner: Box<dyn Executor>) -> Box<dyn Executor> {
    Box::new(RetryExecutor {
        inner,
        policy: BackoffPolicy::default(),
    })
}

struct RetryExecutor {
    inner: Box<dyn Executor>,
    policy: BackoffPolicy,
}

#[async_trait]
impl Executor for RetryExecutor {
    async fn execute(&self, ctx: &CancellationToken, job: &Job) -> Result<()> {
        let mut attempt = 0u32;

        loop {
            match self.inner.execute(ctx, job).await {
                Ok(()) => return Ok(()),
                // Cancellation never burns retry budget.
                Err(err) if err.is_canceled() => return Err(err),
                Err(err) => {
                    if attempt >= MAX_RETRIES {
                        return Err(err);
                    }

                    let delay = next_delay(attempt, &self.policy, &mut rand::thread_rng());
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        // Shutdown while backing off: the executor already
                        // produced a real error, surface that one.
                        _ = ctx.cancelled() => return Err(err),
                    }

                    attempt += 1;
                }
            }
        }
    }
}

fn next_delay(attempt: u32, policy: &BackoffPolicy, rng: &mut impl Rng) -> Duration {
    let base = policy.initial_interval.as_millis() as f64;
    let max = policy.max_interval.as_millis() as f64;

    let mut delay = base * policy.multiplier.powi(attempt as i32);
    if delay > max {
        delay = max;
    }

    // jitter in [-jitter_pct, +jitter_pct]
    let jitter_range = delay * policy.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    Duration::from_millis((delay + jitter).max(0.0).round() as u64)
}
