//! Failure classification and retry execution
//!
//! This module contains the two halves of the resilience framework:
//!
//! - `classify`: maps a raised failure to an [`ErrorCategory`] and a fixed
//!   [`RetryPolicy`] per category
//! - `executor`: runs an operation with bounded attempts, exponential
//!   backoff and optional jitter
//!
//! The same framework is reused by navigation, content processing and
//! translation; each caller keeps its own attempt counter.

mod classify;
mod executor;

pub use classify::{categorize, categorize_message, ErrorCategory, RetryPolicy};
pub use executor::{retry, retry_with_hook, JitterStrategy, RetryOptions};

use std::future::Future;

/// Runs an operation, then retries it under the policy of its failure category
///
/// The first attempt runs unconditionally. If it fails with a retryable
/// category, the remaining attempts of that category's policy run through
/// the executor with decorrelated jitter; any other category fails
/// immediately. `label` only decorates the retry logs.
pub async fn retry_categorized<T, Fut, F>(mut op: F, label: &str) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let first_err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let category = categorize(&first_err);
    if !category.is_retryable() {
        return Err(first_err);
    }

    let policy = category.retry_strategy();
    if policy.max_attempts <= 1 {
        return Err(first_err);
    }

    tracing::debug!(
        "{}: first attempt failed as {:?}, {} retries remain",
        label,
        category,
        policy.max_attempts - 1
    );

    let options = RetryOptions {
        max_attempts: policy.max_attempts - 1,
        delay: policy.base_delay,
        backoff: policy.backoff_multiplier,
        max_delay: policy.max_delay,
        jitter: JitterStrategy::Decorrelated,
    };
    let label = label.to_string();
    retry_with_hook(op, &options, move |attempt, err, wait| {
        tracing::warn!(
            "{}: retry {} failed: {:#}; waiting {:?}",
            label,
            attempt,
            err,
            wait
        );
    })
    .await
}
