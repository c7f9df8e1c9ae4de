//! URL validation, exclusion and normalization
//!
//! Discovery compares URLs in normalized form: lowercased host, no
//! fragment, no trailing slash, default ports dropped. Entry-point
//! comparison additionally ignores the query string, so a link pointing at
//! another entry point via a differing hash or query is still recognized.

use crate::config::Config;
use crate::{UrlError, UrlResult};
use std::collections::HashSet;
use url::Url;

/// Checks whether a host equals an allowed domain or is a subdomain of it
///
/// A leading `*.` on the pattern is accepted and means the same thing.
pub fn host_matches(pattern: &str, candidate: &str) -> bool {
    let base = pattern.strip_prefix("*.").unwrap_or(pattern);
    if base.is_empty() {
        return candidate.is_empty();
    }
    candidate == base || candidate.ends_with(&format!(".{}", base))
}

/// Hrefs that can never become crawlable page URLs
pub fn is_skippable_href(href: &str) -> bool {
    let trimmed = href.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.to_lowercase().starts_with("mailto:")
        || trimmed.to_lowercase().starts_with("tel:")
        || trimmed.to_lowercase().starts_with("javascript:")
}

/// Normalizes a URL for deduplication
///
/// Lowercases the host, strips the fragment and any trailing slash (except
/// for the root path). Non-http(s) schemes are rejected.
pub fn normalize_url(raw: &str) -> UrlResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| UrlError::Parse(err.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url)
}

/// Normalized comparison key that also ignores the query string
///
/// Used for entry-point equality, where hash/query variants of an entry
/// point must compare equal to it.
pub fn comparison_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.set_query(None);
    let path = key.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        key.set_path(path.trim_end_matches('/'));
    }
    key.to_string()
}

/// Simple `*` wildcard match, anchored at both ends
pub fn matches_pattern(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

/// Scope and exclusion rules applied to every discovered URL
pub struct UrlFilter {
    allowed_domains: Vec<String>,
    base_path: Option<String>,
    ignore_literals: HashSet<String>,
    ignore_patterns: Vec<String>,
}

impl UrlFilter {
    pub fn new(
        allowed_domains: Vec<String>,
        base_path: Option<String>,
        ignore_literals: &[String],
        ignore_patterns: Vec<String>,
    ) -> Self {
        // literals are stored normalized so hash/slash variants still match
        let ignore_literals = ignore_literals
            .iter()
            .map(|raw| match normalize_url(raw) {
                Ok(url) => url.to_string(),
                Err(_) => raw.clone(),
            })
            .collect();
        Self {
            allowed_domains,
            base_path,
            ignore_literals,
            ignore_patterns,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.allowed_domains.clone(),
            config.crawler.base_path.clone(),
            &config.exclusions.literals,
            config.exclusions.patterns.clone(),
        )
    }

    /// Accepts http(s) URLs on an allowed domain (or subdomain), under the
    /// configured base path if one is set
    pub fn validate_url(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let host = match url.host_str() {
            Some(host) => host,
            None => return false,
        };
        if !self
            .allowed_domains
            .iter()
            .any(|domain| host_matches(domain, host))
        {
            return false;
        }
        if let Some(prefix) = &self.base_path {
            let path = url.path();
            if path != prefix && !path.starts_with(&format!("{}/", prefix.trim_end_matches('/'))) {
                return false;
            }
        }
        true
    }

    /// True if the URL matches any configured literal or pattern exclusion
    pub fn is_ignored(&self, url: &Url) -> bool {
        let normalized = url.to_string();
        if self.ignore_literals.contains(&normalized) {
            return true;
        }
        self.ignore_patterns
            .iter()
            .any(|pattern| matches_pattern(pattern, &normalized))
    }
}
