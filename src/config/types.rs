use crate::crawler::ArtifactFormat;
use serde::Deserialize;

/// Main configuration structure for Shiori
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    pub output: OutputConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(rename = "entry-point", default)]
    pub entry_points: Vec<EntryPointConfig>,
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub exclusions: ExclusionConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Timeout for a single navigation attempt (milliseconds)
    #[serde(rename = "navigation-timeout-ms", default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Whether transiently failed URLs get one extra in-run retry pass
    #[serde(rename = "url-retries-enabled", default = "default_true")]
    pub url_retries_enabled: bool,

    /// Optional path prefix every crawled URL must live under
    #[serde(rename = "base-path", default)]
    pub base_path: Option<String>,

    /// Period of the background state save timer (seconds)
    #[serde(
        rename = "state-save-interval-secs",
        default = "default_state_save_interval_secs"
    )]
    pub state_save_interval_secs: u64,
}

/// Task queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of simultaneously processed pages
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Start-rate window length (milliseconds); 0 disables the rate limit
    #[serde(rename = "interval-ms", default)]
    pub interval_ms: u64,

    /// Maximum task starts per window
    #[serde(rename = "interval-cap", default = "default_interval_cap")]
    pub interval_cap: usize,

    /// Queue-level per-task timeout (milliseconds); page-processing tasks
    /// ignore it since each sub-operation owns its own timeout
    #[serde(rename = "task-timeout-ms", default)]
    pub task_timeout_ms: Option<u64>,

    /// Whether a queue-level timeout counts as a task failure
    #[serde(rename = "throw-on-timeout", default)]
    pub throw_on_timeout: bool,

    /// Settled-task history capacity
    #[serde(rename = "max-task-history", default = "default_max_task_history")]
    pub max_task_history: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            interval_ms: 0,
            interval_cap: default_interval_cap(),
            task_timeout_ms: None,
            throw_on_timeout: false,
            max_task_history: default_max_task_history(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the per-page artifacts
    #[serde(rename = "artifact-dir")]
    pub artifact_dir: String,

    /// Directory holding the persisted crawl state documents
    #[serde(rename = "metadata-dir")]
    pub metadata_dir: String,

    /// Artifact output format
    #[serde(rename = "artifact-format", default = "default_artifact_format")]
    pub artifact_format: ArtifactFormat,
}

/// In-page translation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Attempt cap for one translation call
    #[serde(rename = "max-segment-retries", default = "default_max_segment_retries")]
    pub max_segment_retries: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_segment_retries: default_max_segment_retries(),
        }
    }
}

/// One starting URL; link discovery for its section begins here
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointConfig {
    /// Section name used for hierarchical organization downstream
    pub name: String,

    /// The entry point URL
    pub url: String,
}

/// Literal and pattern URL exclusions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExclusionConfig {
    #[serde(default)]
    pub literals: Vec<String>,

    /// `*` wildcard patterns matched against the normalized URL
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_state_save_interval_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_interval_cap() -> usize {
    usize::MAX
}

fn default_max_task_history() -> usize {
    100
}

fn default_artifact_format() -> ArtifactFormat {
    ArtifactFormat::Markdown
}

fn default_max_segment_retries() -> u32 {
    3
}
