//! Navigation with lenient-fallback wait strategies
//!
//! Four increasingly lenient wait strategies are tried in order, each
//! independent; the first success wins. Each strategy attempt runs under
//! the categorized retry executor, so a transient network failure retries
//! with its category's backoff before the next strategy is consulted.
//! `navigate_with_fallback` never raises: it returns a structured outcome
//! and lets the caller decide.

use crate::crawler::page::{Page, WaitStrategy};
use crate::retry::retry_categorized;
use anyhow::anyhow;
use std::time::Duration;

/// Strictest to most lenient
pub const FALLBACK_STRATEGIES: [WaitStrategy; 4] = [
    WaitStrategy::NetworkIdle,
    WaitStrategy::Load,
    WaitStrategy::DomContentLoaded,
    WaitStrategy::None,
];

/// One failed strategy attempt
#[derive(Debug, Clone)]
pub struct NavigationAttempt {
    pub strategy: WaitStrategy,
    pub error: String,
}

/// Result of the navigation fallback ladder
#[derive(Debug, Clone)]
pub enum NavigationOutcome {
    /// Navigation succeeded, with the strategy that worked
    Success { strategy: WaitStrategy },
    /// All strategies failed
    Failure { attempts: Vec<NavigationAttempt> },
}

impl NavigationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Navigates to `url`, walking the wait-strategy ladder until one succeeds
pub async fn navigate_with_fallback(
    page: &dyn Page,
    url: &str,
    timeout: Duration,
) -> NavigationOutcome {
    let mut attempts = Vec::new();

    for strategy in FALLBACK_STRATEGIES {
        let result = retry_categorized(
            move || async move {
                page.navigate(url, timeout, strategy)
                    .await
                    .map_err(anyhow::Error::from)
            },
            "navigation",
        )
        .await;

        match result {
            Ok(()) => {
                if !attempts.is_empty() {
                    tracing::debug!(
                        "navigated to {} with {} wait after {} stricter strategies failed",
                        url,
                        strategy,
                        attempts.len()
                    );
                }
                return NavigationOutcome::Success { strategy };
            }
            Err(err) => {
                tracing::warn!("navigation to {} with {} wait failed: {:#}", url, strategy, err);
                attempts.push(NavigationAttempt {
                    strategy,
                    error: format!("{:#}", err),
                });
            }
        }
    }

    NavigationOutcome::Failure { attempts }
}

/// Converts a navigation failure into an error for state recording
///
/// The last attempt's text leads so downstream classification sees it.
pub fn navigation_error(url: &str, attempts: &[NavigationAttempt]) -> anyhow::Error {
    let last = attempts
        .last()
        .map(|attempt| attempt.error.clone())
        .unwrap_or_else(|| "no attempts recorded".to_string());
    anyhow!(
        "{}; navigation to {} failed across {} wait strategies",
        last,
        url,
        attempts.len()
    )
}
