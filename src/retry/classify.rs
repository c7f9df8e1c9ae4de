//! Failure taxonomy for crawl operations
//!
//! Failures reach this layer two ways: as the structured [`PageError`] from
//! the rendering boundary, which carries a machine-readable kind, or as
//! opaque errors bubbled up from an uncontrolled external layer, which are
//! classified by pattern-matching their rendered message. The patterns are
//! evaluated in strict precedence order because categories overlap in
//! surface text ("HTTP 504 Gateway Timeout" must classify as a timeout, not
//! generic network).

use crate::crawler::PageError;
use std::time::Duration;

/// Category assigned to a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Known-benign in-page script error; logged and discarded
    IgnorableJs,
    /// Connection reset/refused, DNS failure, HTTP 502/503
    RetryableNetwork,
    /// Any timeout, including HTTP 504
    RetryableTimeout,
    /// Browser/page/target gone or page creation failed
    RetryableBrowser,
    /// Literal 4xx HTTP status; never re-fetched
    PermanentHttp,
    /// Content validation failed; retrying cannot help
    PermanentValidation,
    /// OS resource exhaustion; retrying typically worsens it
    SystemError,
    /// Unrecognized; defaults to non-retryable to avoid unbounded loops
    Unknown,
}

/// Fixed backoff policy for one error category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

/// Single attempt, no delay: the policy of everything non-retryable
const NO_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 1,
    base_delay: Duration::ZERO,
    backoff_multiplier: 1.0,
    max_delay: Duration::ZERO,
};

impl ErrorCategory {
    /// True for the three RETRYABLE_* categories
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableNetwork | Self::RetryableTimeout | Self::RetryableBrowser
        )
    }

    /// True only for benign in-page script failures
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::IgnorableJs)
    }

    /// Returns the fixed retry policy for this category
    pub fn retry_strategy(&self) -> RetryPolicy {
        match self {
            Self::RetryableNetwork => RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(2000),
                backoff_multiplier: 1.5,
                max_delay: Duration::from_millis(30000),
            },
            Self::RetryableTimeout => RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5000),
                backoff_multiplier: 2.0,
                max_delay: Duration::from_millis(60000),
            },
            Self::RetryableBrowser => RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10000),
                backoff_multiplier: 2.0,
                max_delay: Duration::from_millis(60000),
            },
            _ => NO_RETRY,
        }
    }
}

/// Known-benign in-page script error signatures
const IGNORABLE_JS_SIGNATURES: &[&str] = &[
    "resizeobserver loop",
    "script error",
    "non-error promise rejection",
];

/// Timeout keywords, checked before generic 5xx matching
const TIMEOUT_SIGNATURES: &[&str] = &["timeout", "timed out", "etimedout"];

/// Connection-level and generic network-change failure signatures
const NETWORK_SIGNATURES: &[&str] = &[
    "econnreset",
    "econnrefused",
    "connection reset",
    "connection refused",
    "enotfound",
    "eai_again",
    "dns",
    "network changed",
    "err_network_changed",
    "socket hang up",
    "http 502",
    "502 bad gateway",
    "http 503",
    "503 service unavailable",
];

/// Browser/page lifecycle failure signatures
const BROWSER_SIGNATURES: &[&str] = &[
    "target closed",
    "session closed",
    "page closed",
    "page crashed",
    "browser has disconnected",
    "browser disconnected",
    "failed to create page",
    "failed to open page",
];

/// Content validation failure signatures
const VALIDATION_SIGNATURES: &[&str] = &[
    "validation",
    "content not found",
    "article content is empty",
    "no article content",
];

/// OS resource-exhaustion signatures
const SYSTEM_SIGNATURES: &[&str] = &[
    "enospc",
    "no space left on device",
    "emfile",
    "too many open files",
    "enomem",
    "out of memory",
    "cannot allocate memory",
];

/// Classifies a failure into its [`ErrorCategory`]
///
/// A structured [`PageError`] anywhere in the chain wins; otherwise the
/// rendered message (including causes) is pattern-matched.
pub fn categorize(err: &anyhow::Error) -> ErrorCategory {
    if let Some(page_err) = err.downcast_ref::<PageError>() {
        return page_err.category();
    }
    categorize_message(&format!("{:#}", err))
}

/// Pattern-matching fallback for failures with no structured kind
///
/// Patterns are checked in strict precedence order; the first match wins.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();

    if contains_any(&msg, IGNORABLE_JS_SIGNATURES) {
        return ErrorCategory::IgnorableJs;
    }
    if contains_any(&msg, TIMEOUT_SIGNATURES) {
        return ErrorCategory::RetryableTimeout;
    }
    if contains_any(&msg, NETWORK_SIGNATURES) {
        return ErrorCategory::RetryableNetwork;
    }
    if contains_any(&msg, BROWSER_SIGNATURES) {
        return ErrorCategory::RetryableBrowser;
    }
    if let Some(status) = embedded_http_status(&msg) {
        if (400..500).contains(&status) {
            return ErrorCategory::PermanentHttp;
        }
    }
    if contains_any(&msg, VALIDATION_SIGNATURES) {
        return ErrorCategory::PermanentValidation;
    }
    if contains_any(&msg, SYSTEM_SIGNATURES) {
        return ErrorCategory::SystemError;
    }

    ErrorCategory::Unknown
}

fn contains_any(msg: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|sig| msg.contains(sig))
}

/// Extracts the first "http NNN" status embedded in a lowercased message
fn embedded_http_status(msg: &str) -> Option<u16> {
    for (pos, _) in msg.match_indices("http ") {
        let rest = &msg[pos + 5..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() == 3 {
            if let Ok(status) = digits.parse::<u16>() {
                return Some(status);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn categorize_str(msg: &str) -> ErrorCategory {
        categorize(&anyhow!(msg.to_string()))
    }

    #[test]
    fn test_connection_reset_is_network() {
        assert_eq!(
            categorize_str("ECONNRESET"),
            ErrorCategory::RetryableNetwork
        );
        assert_eq!(
            categorize_str("connection refused by peer"),
            ErrorCategory::RetryableNetwork
        );
    }

    #[test]
    fn test_http_404_is_permanent() {
        assert_eq!(
            categorize_str("HTTP 404 Not Found"),
            ErrorCategory::PermanentHttp
        );
        assert_eq!(
            categorize_str("request failed with HTTP 403"),
            ErrorCategory::PermanentHttp
        );
    }

    #[test]
    fn test_504_gateway_timeout_is_timeout_not_network() {
        // the timeout keyword outranks generic 5xx matching
        assert_eq!(
            categorize_str("HTTP 504 Gateway Timeout"),
            ErrorCategory::RetryableTimeout
        );
    }

    #[test]
    fn test_502_503_are_network() {
        assert_eq!(
            categorize_str("HTTP 502 Bad Gateway"),
            ErrorCategory::RetryableNetwork
        );
        assert_eq!(
            categorize_str("upstream returned HTTP 503"),
            ErrorCategory::RetryableNetwork
        );
    }

    #[test]
    fn test_ignorable_js_outranks_everything() {
        assert_eq!(
            categorize_str("Script error: timeout in handler"),
            ErrorCategory::IgnorableJs
        );
        assert_eq!(
            categorize_str("ResizeObserver loop limit exceeded"),
            ErrorCategory::IgnorableJs
        );
    }

    #[test]
    fn test_browser_signatures() {
        assert_eq!(
            categorize_str("Protocol error: Target closed"),
            ErrorCategory::RetryableBrowser
        );
        assert_eq!(
            categorize_str("failed to create page in context"),
            ErrorCategory::RetryableBrowser
        );
    }

    #[test]
    fn test_validation_signatures() {
        assert_eq!(
            categorize_str("article content not found on page"),
            ErrorCategory::PermanentValidation
        );
    }

    #[test]
    fn test_system_signatures() {
        assert_eq!(
            categorize_str("write failed: ENOSPC no space left on device"),
            ErrorCategory::SystemError
        );
        assert_eq!(
            categorize_str("EMFILE too many open files"),
            ErrorCategory::SystemError
        );
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(
            categorize_str("something completely unexpected"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_structured_page_error_wins_over_text() {
        // message text says "timeout" but the structured kind is a 404
        let err = anyhow::Error::new(PageError::HttpStatus {
            url: "https://docs.example.com/gone-timeout".to_string(),
            status: 404,
        });
        assert_eq!(categorize(&err), ErrorCategory::PermanentHttp);
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorCategory::RetryableNetwork.is_retryable());
        assert!(ErrorCategory::RetryableTimeout.is_retryable());
        assert!(ErrorCategory::RetryableBrowser.is_retryable());

        assert!(!ErrorCategory::IgnorableJs.is_retryable());
        assert!(!ErrorCategory::PermanentHttp.is_retryable());
        assert!(!ErrorCategory::PermanentValidation.is_retryable());
        assert!(!ErrorCategory::SystemError.is_retryable());
        assert!(!ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn test_is_ignorable() {
        assert!(ErrorCategory::IgnorableJs.is_ignorable());
        assert!(!ErrorCategory::RetryableNetwork.is_ignorable());
        assert!(!ErrorCategory::Unknown.is_ignorable());
    }

    #[test]
    fn test_retry_strategy_table() {
        let network = ErrorCategory::RetryableNetwork.retry_strategy();
        assert_eq!(network.max_attempts, 5);
        assert_eq!(network.base_delay, Duration::from_millis(2000));
        assert_eq!(network.backoff_multiplier, 1.5);
        assert_eq!(network.max_delay, Duration::from_millis(30000));

        let timeout = ErrorCategory::RetryableTimeout.retry_strategy();
        assert_eq!(timeout.max_attempts, 3);
        assert_eq!(timeout.base_delay, Duration::from_millis(5000));

        let browser = ErrorCategory::RetryableBrowser.retry_strategy();
        assert_eq!(browser.max_attempts, 3);
        assert_eq!(browser.base_delay, Duration::from_millis(10000));
        assert_eq!(browser.max_delay, Duration::from_millis(60000));
    }

    #[test]
    fn test_non_retryable_strategy_is_single_attempt() {
        for category in [
            ErrorCategory::IgnorableJs,
            ErrorCategory::PermanentHttp,
            ErrorCategory::PermanentValidation,
            ErrorCategory::SystemError,
            ErrorCategory::Unknown,
        ] {
            let policy = category.retry_strategy();
            assert_eq!(policy.max_attempts, 1);
            assert_eq!(policy.base_delay, Duration::ZERO);
        }
    }
}
