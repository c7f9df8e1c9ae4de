//! Per-URL state machine for the crawl pipeline
//!
//! A URL's transitions are strictly ordered and never revisited once
//! terminal, except via an explicit retry pass.

use std::fmt;

/// The state of one URL as the orchestrator drives it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    /// Discovered, waiting to be dispatched
    Pending,

    /// A pipeline is currently working on it
    Processing,

    /// Extraction, artifact generation and metadata persistence all
    /// durably completed
    Success,

    /// Terminally failed at this layer
    Failed,

    /// Failed on the first pass with URL retries enabled; not yet terminal
    /// for progress counters
    PendingRetry,

    /// Persisted state already showed success; no work was performed
    Skipped,
}

impl UrlStatus {
    /// Returns true once no further processing will happen for this URL
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns true if the URL's artifact exists, whether from this run or
    /// a previous one
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PendingRetry => "pending-retry",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "pending-retry" => Some(Self::PendingRetry),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
