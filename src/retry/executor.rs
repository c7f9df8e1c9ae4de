//! Generic retry executor with exponential backoff and jitter
//!
//! Waiting suspends only the calling operation; other in-flight pipelines
//! keep running. After the final attempt the last error is returned to the
//! caller instead of being retried again.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How backoff delays are randomized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Use the computed delay as-is
    None,
    /// Draw uniformly from [0, computed delay]
    Full,
    /// Draw uniformly from [base delay, previous wait * 3], capped at the
    /// maximum delay; reduces synchronized retry storms across independent
    /// concurrent callers
    Decorrelated,
}

/// Options for one retry loop
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub delay: Duration,
    /// Multiplier applied per attempt
    pub backoff: f64,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    pub jitter: JitterStrategy,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryOptions {
    /// Builds options from a category's fixed policy
    pub fn from_policy(policy: &super::RetryPolicy, jitter: JitterStrategy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            delay: policy.base_delay,
            backoff: policy.backoff_multiplier,
            max_delay: policy.max_delay,
            jitter,
        }
    }
}

/// Runs `op` with bounded attempts and backoff
pub async fn retry<T, Fut, F>(op: F, options: &RetryOptions) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    retry_with_hook(op, options, |_, _, _| {}).await
}

/// Runs `op` with bounded attempts and backoff, reporting each retry
///
/// `on_retry(attempt, error, wait)` fires before each wait. It is a
/// side-channel for observability only; it cannot alter control flow.
pub async fn retry_with_hook<T, Fut, F, H>(
    mut op: F,
    options: &RetryOptions,
    mut on_retry: H,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    H: FnMut(u32, &anyhow::Error, Duration),
{
    let max_attempts = options.max_attempts.max(1);
    let mut prev_wait = options.delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let wait = next_wait(options, attempt, prev_wait);
                prev_wait = wait;
                on_retry(attempt, &err, wait);
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Computes the wait before retry number `attempt + 1`
fn next_wait(options: &RetryOptions, attempt: u32, prev_wait: Duration) -> Duration {
    let base_ms = options.delay.as_millis() as f64;
    let max_ms = options.max_delay.as_millis() as u64;
    let computed = (base_ms * options.backoff.powi(attempt as i32 - 1)).min(max_ms as f64) as u64;

    match options.jitter {
        JitterStrategy::None => Duration::from_millis(computed),
        JitterStrategy::Full => {
            if computed == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(0..=computed))
            }
        }
        JitterStrategy::Decorrelated => {
            let lo = options.delay.as_millis() as u64;
            let hi = (prev_wait.as_millis() as u64)
                .saturating_mul(3)
                .min(max_ms)
                .max(lo);
            if hi <= lo {
                Duration::from_millis(lo)
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
            }
        }
    }
}
