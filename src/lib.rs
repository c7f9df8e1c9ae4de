//! Shiori: resilience and orchestration core for documentation archiving
//!
//! This crate implements the crawl core of a documentation-site archiver:
//! a concurrency-bounded task queue, a persisted resumable crawl state with
//! a strict disjointness invariant, and a failure-taxonomy-driven retry
//! framework, all coordinated by a crawl orchestrator. Page rendering,
//! content extraction, artifact typesetting and metadata storage are
//! external collaborators reached through the traits in [`crawler`].

pub mod config;
pub mod crawler;
pub mod events;
pub mod queue;
pub mod retry;
pub mod state;

use thiserror::Error;

/// Main error type for Shiori operations
#[derive(Debug, Error)]
pub enum ShioriError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Page error: {0}")]
    Page(#[from] crawler::PageError),

    #[error("A crawl run is already in progress")]
    AlreadyRunning,

    #[error("Orchestrator is not initialized; call initialize() or run() first")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Shiori operations
pub type Result<T> = std::result::Result<T, ShioriError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    ArtifactFormat, ArtifactOptions, MetadataStore, NavigationOutcome, Orchestrator, Page,
    PageError, Renderer, RunSummary, Section, UrlStatus, WaitStrategy,
};
pub use events::{Event, EventBus, EventKind};
pub use queue::{QueueOptions, QueueStatus, TaskQueue, TaskStatus};
pub use retry::{categorize, retry, ErrorCategory, JitterStrategy, RetryOptions, RetryPolicy};
pub use state::{CrawlState, CrawlStats};
