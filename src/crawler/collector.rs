//! Entry-point link discovery
//!
//! For each configured entry point the collector navigates, harvests the
//! page's links through a page-evaluation call, and keeps the ones inside
//! that entry point's scope. Links pointing at other configured entry
//! points (even via a differing hash or query) and non-http(s) schemes are
//! excluded. Results are globally deduplicated by normalized URL, and each
//! URL's section membership is recorded for downstream hierarchical
//! organization. A failing entry point is logged and skipped without
//! aborting discovery of the others.

use crate::config::{Config, EntryPointConfig};
use crate::crawler::metadata::Section;
use crate::crawler::navigation::{navigate_with_fallback, navigation_error, NavigationOutcome};
use crate::crawler::page::{Page, Renderer};
use crate::crawler::url_filter::{comparison_key, is_skippable_href, normalize_url, UrlFilter};
use anyhow::Context;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Page script harvesting every anchor's raw href
pub(crate) const LINK_COLLECTION_SCRIPT: &str =
    "Array.from(document.querySelectorAll('a[href]')).map((a) => a.getAttribute('href'))";

/// One discovered URL with its section membership
#[derive(Debug, Clone)]
pub struct DiscoveredUrl {
    pub url: String,
    pub section: String,
}

/// The outcome of URL discovery across all entry points
#[derive(Debug, Clone, Default)]
pub struct CollectedUrls {
    /// Globally deduplicated, in discovery order; each entry point's own
    /// URL leads its section
    pub urls: Vec<DiscoveredUrl>,
    /// Per-section membership for table-of-contents generation
    pub sections: Vec<Section>,
    /// Links dropped by global deduplication
    pub duplicates: usize,
}

/// Discovers URLs from every configured entry point
pub async fn collect_urls(
    renderer: &dyn Renderer,
    config: &Config,
    filter: &UrlFilter,
) -> CollectedUrls {
    // comparison keys of every entry point, for cross-entry exclusion
    let entry_keys: Vec<String> = config
        .entry_points
        .iter()
        .filter_map(|entry| normalize_url(&entry.url).ok())
        .map(|url| comparison_key(&url))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = CollectedUrls::default();

    for entry in &config.entry_points {
        match collect_section(renderer, config, filter, entry, &entry_keys).await {
            Ok(section_urls) => {
                let mut section = Section {
                    name: entry.name.clone(),
                    entry_url: entry.url.clone(),
                    urls: Vec::new(),
                };
                for url in section_urls {
                    if seen.insert(url.clone()) {
                        section.urls.push(url.clone());
                        collected.urls.push(DiscoveredUrl {
                            url,
                            section: entry.name.clone(),
                        });
                    } else {
                        collected.duplicates += 1;
                    }
                }
                tracing::info!(
                    "section '{}': {} URL(s) discovered",
                    section.name,
                    section.urls.len()
                );
                collected.sections.push(section);
            }
            Err(err) => {
                tracing::warn!(
                    "entry point {} failed: {:#}; skipping its section",
                    entry.url,
                    err
                );
            }
        }
    }

    tracing::info!(
        "discovery finished: {} unique URL(s) across {} section(s), {} duplicate(s) dropped",
        collected.urls.len(),
        collected.sections.len(),
        collected.duplicates
    );
    collected
}

/// Collects one entry point's URLs; the entry's own URL always leads
async fn collect_section(
    renderer: &dyn Renderer,
    config: &Config,
    filter: &UrlFilter,
    entry: &EntryPointConfig,
    entry_keys: &[String],
) -> anyhow::Result<Vec<String>> {
    let entry_url = normalize_url(&entry.url)
        .with_context(|| format!("invalid entry point URL {}", entry.url))?;

    let page = renderer.acquire_page().await?;
    let result = gather_links(&*page, config, filter, &entry_url, entry_keys).await;
    if let Err(err) = page.close().await {
        tracing::warn!("failed to release discovery page for {}: {}", entry.url, err);
    }
    result
}

async fn gather_links(
    page: &dyn Page,
    config: &Config,
    filter: &UrlFilter,
    entry_url: &Url,
    entry_keys: &[String],
) -> anyhow::Result<Vec<String>> {
    let timeout = Duration::from_millis(config.crawler.navigation_timeout_ms);
    match navigate_with_fallback(page, entry_url.as_str(), timeout).await {
        NavigationOutcome::Success { strategy } => {
            tracing::debug!("entry {} loaded with {} wait", entry_url, strategy);
        }
        NavigationOutcome::Failure { attempts } => {
            return Err(navigation_error(entry_url.as_str(), &attempts));
        }
    }

    let raw = page.evaluate(LINK_COLLECTION_SCRIPT).await?;
    let hrefs: Vec<String> = serde_json::from_value(raw).unwrap_or_default();

    let scope = scope_prefix(entry_url);
    let own_key = comparison_key(entry_url);
    let mut urls = vec![entry_url.to_string()];

    for href in hrefs {
        if is_skippable_href(&href) {
            continue;
        }
        let resolved = match entry_url.join(&href) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::debug!("unresolvable href '{}' on {}: {}", href, entry_url, err);
                continue;
            }
        };
        let normalized = match normalize_url(resolved.as_str()) {
            Ok(normalized) => normalized,
            Err(_) => continue,
        };
        if !filter.validate_url(&normalized) || filter.is_ignored(&normalized) {
            continue;
        }
        let key = comparison_key(&normalized);
        // the entry itself was already placed first; other entry points
        // belong to their own sections
        if key == own_key || entry_keys.contains(&key) {
            continue;
        }
        if !in_scope(&normalized, &scope) {
            continue;
        }
        urls.push(normalized.to_string());
    }

    Ok(urls)
}

/// The path prefix defining an entry point's scope
fn scope_prefix(entry_url: &Url) -> String {
    let path = entry_url.path().trim_end_matches('/');
    path.to_string()
}

fn in_scope(url: &Url, scope: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    let path = url.path();
    path == scope || path.starts_with(&format!("{}/", scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_prefix_trims_trailing_slash() {
        let url = Url::parse("https://docs.example.com/guide/").unwrap();
        assert_eq!(scope_prefix(&url), "/guide");

        let root = Url::parse("https://docs.example.com/").unwrap();
        assert_eq!(scope_prefix(&root), "");
    }

    #[test]
    fn test_in_scope() {
        let inside = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let exact = Url::parse("https://docs.example.com/guide").unwrap();
        let outside = Url::parse("https://docs.example.com/api/intro").unwrap();
        let sneaky = Url::parse("https://docs.example.com/guidebook").unwrap();

        assert!(in_scope(&inside, "/guide"));
        assert!(in_scope(&exact, "/guide"));
        assert!(!in_scope(&outside, "/guide"));
        assert!(!in_scope(&sneaky, "/guide"));

        // a root entry point scopes the whole host
        assert!(in_scope(&outside, ""));
    }
}
