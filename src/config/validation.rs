use crate::config::types::{Config, CrawlerConfig, EntryPointConfig, QueueSettings};
use crate::crawler::host_matches;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_queue_settings(&config.queue)?;
    validate_output_config(config)?;
    validate_entry_points(&config.entry_points, &config.allowed_domains)?;
    validate_translation(config)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms < 1000 {
        return Err(ConfigError::Validation(format!(
            "navigation-timeout-ms must be >= 1000ms, got {}ms",
            config.navigation_timeout_ms
        )));
    }

    if config.state_save_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "state-save-interval-secs must be >= 1".to_string(),
        ));
    }

    if let Some(base_path) = &config.base_path {
        if !base_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "base-path must start with '/', got '{}'",
                base_path
            )));
        }
    }

    Ok(())
}

/// Validates queue settings
fn validate_queue_settings(config: &QueueSettings) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "queue concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.interval_ms > 0 && config.interval_cap == 0 {
        return Err(ConfigError::Validation(
            "interval-cap must be >= 1 when interval-ms is set".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &Config) -> Result<(), ConfigError> {
    if config.output.artifact_dir.is_empty() {
        return Err(ConfigError::Validation(
            "artifact-dir cannot be empty".to_string(),
        ));
    }

    if config.output.metadata_dir.is_empty() {
        return Err(ConfigError::Validation(
            "metadata-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates entry points against the allowed domains
fn validate_entry_points(
    entry_points: &[EntryPointConfig],
    allowed_domains: &[String],
) -> Result<(), ConfigError> {
    if entry_points.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[entry-point]] is required".to_string(),
        ));
    }

    if allowed_domains.is_empty() {
        return Err(ConfigError::Validation(
            "allowed-domains cannot be empty".to_string(),
        ));
    }

    for entry in entry_points {
        if entry.name.is_empty() {
            return Err(ConfigError::Validation(format!(
                "entry point {} is missing a name",
                entry.url
            )));
        }

        let url = Url::parse(&entry.url)
            .map_err(|err| ConfigError::InvalidUrl(format!("{}: {}", entry.url, err)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "entry point {} must be http or https",
                entry.url
            )));
        }

        let host = url.host_str().ok_or_else(|| {
            ConfigError::InvalidUrl(format!("entry point {} has no host", entry.url))
        })?;

        if !allowed_domains
            .iter()
            .any(|domain| host_matches(domain, host))
        {
            return Err(ConfigError::Validation(format!(
                "entry point {} is outside the allowed domains",
                entry.url
            )));
        }
    }

    Ok(())
}

fn validate_translation(config: &Config) -> Result<(), ConfigError> {
    let retries = config.translation.max_segment_retries;
    if retries < 1 || retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-segment-retries must be between 1 and 10, got {}",
            retries
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config;
    use tempfile::tempdir;

    #[test]
    fn test_valid_config_passes() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.queue.concurrency = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_excessive_concurrency() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.queue.concurrency = 500;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_rate_limit_without_cap() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.queue.interval_ms = 1000;
        config.queue.interval_cap = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_short_navigation_timeout() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.crawler.navigation_timeout_ms = 10;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_missing_entry_points() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.entry_points.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_missing_allowed_domains() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.allowed_domains.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_entry_point_outside_allowed_domains() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.entry_points[0].url = "https://other.example.org/guide".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_non_http_entry_point() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.entry_points[0].url = "ftp://docs.example.com/guide".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_entry_point_url() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.entry_points[0].url = "not a url".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_accepts_entry_point_on_subdomain() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.entry_points[0].url = "https://v2.docs.example.com/guide".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_relative_base_path() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.crawler.base_path = Some("guide".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_segment_retries() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.translation.max_segment_retries = 0;
        assert!(validate(&config).is_err());
        config.translation.max_segment_retries = 50;
        assert!(validate(&config).is_err());
    }
}
