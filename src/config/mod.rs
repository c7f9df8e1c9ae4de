//! Configuration module for Shiori
//!
//! This module handles loading, parsing and validating TOML configuration
//! files.
//!
//! # Example
//!
//! ```no_run
//! use shiori::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawling {} entry point(s)", config.entry_points.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, EntryPointConfig, ExclusionConfig, OutputConfig, QueueSettings,
    TranslationConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

// Re-export validation
pub use validation::validate;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::crawler::ArtifactFormat;
    use std::path::Path;

    /// A small config rooted at a temporary directory, shared by unit tests
    pub(crate) fn test_config(dir: &Path) -> Config {
        Config {
            crawler: CrawlerConfig {
                navigation_timeout_ms: 1000,
                url_retries_enabled: true,
                base_path: None,
                state_save_interval_secs: 30,
            },
            queue: QueueSettings {
                concurrency: 2,
                interval_ms: 0,
                interval_cap: usize::MAX,
                task_timeout_ms: None,
                throw_on_timeout: false,
                max_task_history: 100,
            },
            output: OutputConfig {
                artifact_dir: dir.join("artifacts").display().to_string(),
                metadata_dir: dir.join("metadata").display().to_string(),
                artifact_format: ArtifactFormat::Markdown,
            },
            translation: TranslationConfig::default(),
            entry_points: vec![EntryPointConfig {
                name: "Guide".to_string(),
                url: "https://docs.example.com/guide".to_string(),
            }],
            allowed_domains: vec!["docs.example.com".to_string()],
            exclusions: ExclusionConfig::default(),
        }
    }
}
