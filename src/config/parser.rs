use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// The configuration is validated before being returned.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is persisted with crawl progress so a resumed run can detect
/// that it operates under a changed configuration.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG: &str = r#"
allowed-domains = ["docs.example.com"]

[crawler]
navigation-timeout-ms = 20000

[queue]
concurrency = 3
interval-ms = 1000
interval-cap = 5

[output]
artifact-dir = "./artifacts"
metadata-dir = "./metadata"
artifact-format = "pdf"

[[entry-point]]
name = "Guide"
url = "https://docs.example.com/guide"

[[entry-point]]
name = "API"
url = "https://docs.example.com/api"

[exclusions]
literals = ["https://docs.example.com/guide/changelog"]
patterns = ["*/internal/*"]
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.navigation_timeout_ms, 20000);
        assert!(config.crawler.url_retries_enabled);
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.queue.interval_cap, 5);
        assert_eq!(config.entry_points.len(), 2);
        assert_eq!(config.entry_points[0].name, "Guide");
        assert_eq!(config.exclusions.patterns.len(), 1);
        assert_eq!(
            config.output.artifact_format,
            crate::crawler::ArtifactFormat::Pdf
        );
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let minimal = r#"
allowed-domains = ["docs.example.com"]

[crawler]

[output]
artifact-dir = "./artifacts"
metadata-dir = "./metadata"

[[entry-point]]
name = "Guide"
url = "https://docs.example.com/guide"
"#;
        let file = create_temp_config(minimal);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.navigation_timeout_ms, 30000);
        assert_eq!(config.crawler.state_save_interval_secs, 30);
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.queue.max_task_history, 100);
        assert!(!config.translation.enabled);
        assert_eq!(config.translation.max_segment_retries, 3);
        assert_eq!(
            config.output.artifact_format,
            crate::crawler::ArtifactFormat::Markdown
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let no_entries = r#"
allowed-domains = ["docs.example.com"]

[crawler]

[output]
artifact-dir = "./artifacts"
metadata-dir = "./metadata"
"#;
        let file = create_temp_config(no_entries);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(VALID_CONFIG);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.entry_points.len(), 2);
        assert_eq!(hash.len(), 64);
    }
}
