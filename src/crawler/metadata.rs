//! Metadata storage collaborator contract
//!
//! Title persistence is on the critical path of a URL's success: a page is
//! only reported processed after [`MetadataStore::save_article_title`] has
//! durably completed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A logical grouping of discovered pages rooted at one entry point, used
/// for hierarchical table-of-contents generation downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub entry_url: String,
    pub urls: Vec<String>,
}

/// Sink for per-article and per-section metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persists an article's title; must durably succeed before the URL may
    /// be reported processed
    async fn save_article_title(&self, url: &str, index: usize, title: &str)
        -> anyhow::Result<()>;

    /// Persists the section structure produced by URL discovery
    async fn save_section_structure(&self, sections: &[Section]) -> anyhow::Result<()>;

    /// Records a terminally failed link for later inspection
    async fn log_failed_link(&self, url: &str, error: &str) -> anyhow::Result<()>;
}
