//! Persisted crawl state
//!
//! This module makes a crawl resumable: restarting the process and calling
//! `load()` reproduces exactly which URLs are done, failed or still pending,
//! with no re-fetch of completed work.
//!
//! # Components
//!
//! - `JsonStore`: one JSON document per concern under a metadata directory,
//!   written atomically and serialized per file
//! - `CrawlState`: the in-memory record with its disjointness invariant
//!   (a URL is never both processed and failed; on conflict, failure wins)

mod crawl_state;
mod store;

pub use crawl_state::{
    spawn_autosave, CrawlState, CrawlStats, DEFAULT_AUTOSAVE_INTERVAL, SAVE_DEBOUNCE,
};
pub use store::{JsonStore, StateError};

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;
