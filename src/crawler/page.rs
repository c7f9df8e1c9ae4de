//! Rendering collaborator contracts
//!
//! The core never talks to a browser directly; it drives an abstract
//! [`Renderer`] that hands out [`Page`]s. Content extraction and translation
//! are invoked as page-evaluation calls, so their failures flow through the
//! same [`PageError`] boundary and classify identically to navigation
//! failures.

use crate::retry::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How long navigation waits before declaring the page ready
///
/// Ordered strictest to most lenient; the fallback ladder walks them in
/// this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStrategy {
    /// Wait until the network has been quiet
    NetworkIdle,
    /// Wait for the load event
    Load,
    /// Wait for DOMContentLoaded only
    DomContentLoaded,
    /// Do not wait at all
    None,
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NetworkIdle => "network-idle",
            Self::Load => "load",
            Self::DomContentLoaded => "dom-content-loaded",
            Self::None => "none",
        };
        write!(f, "{}", label)
    }
}

/// Artifact output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Markdown,
    Pdf,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Pdf => "pdf",
        }
    }
}

/// Options passed to [`Page::generate_artifact`]
#[derive(Debug, Clone)]
pub struct ArtifactOptions {
    pub format: ArtifactFormat,
    /// Render background graphics into the artifact
    pub print_background: bool,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            format: ArtifactFormat::Markdown,
            print_background: true,
        }
    }
}

/// Structured failure from the rendering boundary
///
/// Carries a machine-readable kind so classification does not depend on
/// message sniffing; the string-pattern classifier remains a fallback for
/// failures arriving from layers outside this contract.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("navigation timed out after {timeout_ms} ms for {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("browser unavailable: {message}")]
    BrowserGone { message: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("content validation failed for {url}: {message}")]
    Validation { url: String, message: String },

    #[error("in-page script error: {message}")]
    Script { message: String },

    #[error("system resource exhausted: {message}")]
    System { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl PageError {
    /// Maps the structured kind to its failure category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::RetryableTimeout,
            Self::Network { .. } => ErrorCategory::RetryableNetwork,
            Self::BrowserGone { .. } => ErrorCategory::RetryableBrowser,
            Self::HttpStatus { status, .. } => match status {
                400..=499 => ErrorCategory::PermanentHttp,
                502 | 503 => ErrorCategory::RetryableNetwork,
                504 => ErrorCategory::RetryableTimeout,
                _ => ErrorCategory::Unknown,
            },
            Self::Validation { .. } => ErrorCategory::PermanentValidation,
            Self::Script { .. } => ErrorCategory::IgnorableJs,
            Self::System { .. } => ErrorCategory::SystemError,
            Self::Other { .. } => ErrorCategory::Unknown,
        }
    }
}

/// One rendered page
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to `url`, waiting per `wait`, bounded by `timeout`
    async fn navigate(
        &self,
        url: &str,
        timeout: Duration,
        wait: WaitStrategy,
    ) -> Result<(), PageError>;

    /// Evaluates a script in the page and returns its JSON result
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError>;

    /// Writes the rendered page as a durable artifact at `path`
    async fn generate_artifact(
        &self,
        path: &Path,
        options: &ArtifactOptions,
    ) -> Result<(), PageError>;

    /// The current document title
    async fn title(&self) -> Result<String, PageError>;

    /// Releases the page
    async fn close(&self) -> Result<(), PageError>;
}

/// Hands out pages and owns the underlying rendering resources
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Acquires a fresh page
    async fn acquire_page(&self) -> Result<Box<dyn Page>, PageError>;

    /// Releases all rendering resources; acquiring after close is up to the
    /// implementation
    async fn close(&self) -> Result<(), PageError>;
}
