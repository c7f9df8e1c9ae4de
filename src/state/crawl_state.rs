//! Durable, resumable per-URL crawl outcomes
//!
//! `CrawlState` has exactly one writer, the orchestrator; every mutation
//! goes through its `mark_*` methods so the disjointness invariant
//! (`processed ∩ failed = ∅`, failure wins) stays centrally enforceable.
//! `load()` and `save()` both reconcile the invariant, repairing state files
//! written by earlier, possibly crashed, runs.

use crate::events::{Event, EventBus};
use crate::state::store::JsonStore;
use crate::state::{StateError, StateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between unforced saves
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

/// Default period of the autosave timer
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

const PROGRESS_FILE: &str = "progress.json";
const IMAGE_FAILURES_FILE: &str = "image-load-failures.json";
const URL_MAPPING_FILE: &str = "url-mapping.json";

/// Snapshot of crawl progress counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub pending: usize,
    pub image_load_failures: usize,
    /// Share of attempted URLs that processed successfully, in percent
    pub success_rate: f64,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FailedUrlEntry {
    url: String,
    error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDoc {
    processed_urls: Vec<String>,
    failed_urls: Vec<FailedUrlEntry>,
    url_to_index: BTreeMap<String, usize>,
    start_time: DateTime<Utc>,
    saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config_hash: Option<String>,
    stats: CrawlStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageFailureEntry {
    url: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingEntry {
    path: String,
    timestamp: DateTime<Utc>,
}

/// Durable record of per-URL crawl outcomes
pub struct CrawlState {
    store: JsonStore,
    events: Arc<EventBus>,
    processed_urls: HashSet<String>,
    failed_urls: HashMap<String, String>,
    url_to_index: HashMap<String, usize>,
    index_to_url: BTreeMap<usize, String>,
    image_load_failures: HashMap<String, DateTime<Utc>>,
    url_to_output_path: HashMap<String, MappingEntry>,
    start_time: DateTime<Utc>,
    last_persist: Option<Instant>,
    config_hash: Option<String>,
}

impl CrawlState {
    pub fn new(store: JsonStore, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            processed_urls: HashSet::new(),
            failed_urls: HashMap::new(),
            url_to_index: HashMap::new(),
            index_to_url: BTreeMap::new(),
            image_load_failures: HashMap::new(),
            url_to_output_path: HashMap::new(),
            start_time: Utc::now(),
            last_persist: None,
            config_hash: None,
        }
    }

    /// Records the config hash this run operates under; persisted alongside
    /// progress and compared on resume
    pub fn set_config_hash(&mut self, hash: impl Into<String>) {
        self.config_hash = Some(hash.into());
    }

    /// Hydrates the in-memory state from durable storage
    ///
    /// Missing or corrupt documents yield empty defaults and a
    /// [`Event::StateLoadError`] signal; this method never fails.
    pub async fn load(&mut self) {
        match self.store.read::<ProgressDoc>(PROGRESS_FILE).await {
            Ok(Some(doc)) => {
                if let (Some(current), Some(saved)) = (&self.config_hash, &doc.config_hash) {
                    if current != saved {
                        tracing::warn!(
                            "configuration changed since last save (hash {} -> {}); resuming anyway",
                            saved,
                            current
                        );
                    }
                }
                self.processed_urls = doc.processed_urls.into_iter().collect();
                self.failed_urls = doc
                    .failed_urls
                    .into_iter()
                    .map(|entry| (entry.url, entry.error))
                    .collect();
                self.index_to_url = doc
                    .url_to_index
                    .iter()
                    .map(|(url, index)| (*index, url.clone()))
                    .collect();
                self.url_to_index = doc.url_to_index.into_iter().collect();
                self.start_time = doc.start_time;
                tracing::info!(
                    "loaded crawl state: {} processed, {} failed, {} indexed",
                    self.processed_urls.len(),
                    self.failed_urls.len(),
                    self.url_to_index.len()
                );
            }
            Ok(None) => {
                tracing::info!("no saved crawl state found, starting empty");
            }
            Err(err) => self.report_load_error(PROGRESS_FILE, &err),
        }

        match self
            .store
            .read::<Vec<ImageFailureEntry>>(IMAGE_FAILURES_FILE)
            .await
        {
            Ok(Some(entries)) => {
                self.image_load_failures = entries
                    .into_iter()
                    .map(|entry| (entry.url, entry.timestamp))
                    .collect();
            }
            Ok(None) => {}
            Err(err) => self.report_load_error(IMAGE_FAILURES_FILE, &err),
        }

        match self
            .store
            .read::<BTreeMap<String, MappingEntry>>(URL_MAPPING_FILE)
            .await
        {
            Ok(Some(mapping)) => {
                self.url_to_output_path = mapping.into_iter().collect();
            }
            Ok(None) => {}
            Err(err) => self.report_load_error(URL_MAPPING_FILE, &err),
        }

        self.reconcile_invariant("load");
    }

    fn report_load_error(&self, file: &str, err: &StateError) {
        tracing::warn!("could not load {}: {}; using empty defaults", file, err);
        self.events.emit(&Event::StateLoadError {
            file: file.to_string(),
            error: err.to_string(),
        });
    }

    /// Persists the current state
    ///
    /// Without `force`, a call within [`SAVE_DEBOUNCE`] of the previous save
    /// is a no-op, protecting against save storms during bursts of
    /// completions.
    pub async fn save(&mut self, force: bool) -> StateResult<()> {
        if !force {
            if let Some(last) = self.last_persist {
                if last.elapsed() < SAVE_DEBOUNCE {
                    tracing::trace!("skipping save, last persist {:?} ago", last.elapsed());
                    return Ok(());
                }
            }
        }

        self.reconcile_invariant("save");

        let progress = ProgressDoc {
            processed_urls: {
                let mut urls: Vec<_> = self.processed_urls.iter().cloned().collect();
                urls.sort();
                urls
            },
            failed_urls: {
                let mut entries: Vec<_> = self
                    .failed_urls
                    .iter()
                    .map(|(url, error)| FailedUrlEntry {
                        url: url.clone(),
                        error: error.clone(),
                    })
                    .collect();
                entries.sort_by(|a, b| a.url.cmp(&b.url));
                entries
            },
            url_to_index: self
                .url_to_index
                .iter()
                .map(|(url, index)| (url.clone(), *index))
                .collect(),
            start_time: self.start_time,
            saved_at: Utc::now(),
            config_hash: self.config_hash.clone(),
            stats: self.stats(),
        };
        self.store.write(PROGRESS_FILE, &progress).await?;

        let image_failures: Vec<ImageFailureEntry> = {
            let mut entries: Vec<_> = self
                .image_load_failures
                .iter()
                .map(|(url, timestamp)| ImageFailureEntry {
                    url: url.clone(),
                    timestamp: *timestamp,
                })
                .collect();
            entries.sort_by(|a, b| a.url.cmp(&b.url));
            entries
        };
        self.store.write(IMAGE_FAILURES_FILE, &image_failures).await?;

        let mapping: BTreeMap<String, MappingEntry> = self
            .url_to_output_path
            .iter()
            .map(|(url, entry)| (url.clone(), entry.clone()))
            .collect();
        self.store.write(URL_MAPPING_FILE, &mapping).await?;

        self.last_persist = Some(Instant::now());
        self.events.emit(&Event::StateSaved { forced: force });
        tracing::debug!(
            "persisted crawl state ({} processed, {} failed)",
            self.processed_urls.len(),
            self.failed_urls.len()
        );
        Ok(())
    }

    /// Repairs the disjointness invariant; failure wins on conflict
    fn reconcile_invariant(&mut self, context: &str) -> usize {
        let conflicting: Vec<String> = self
            .processed_urls
            .iter()
            .filter(|url| self.failed_urls.contains_key(*url))
            .cloned()
            .collect();

        for url in &conflicting {
            self.processed_urls.remove(url);
            self.url_to_output_path.remove(url);
        }

        if !conflicting.is_empty() {
            tracing::warn!(
                "repaired {} URL(s) recorded as both processed and failed during {} (failure wins)",
                conflicting.len(),
                context
            );
        }
        conflicting.len()
    }

    /// Records a URL as successfully processed, clearing any failure record
    pub fn mark_processed(&mut self, url: &str, output_path: Option<&Path>) {
        self.processed_urls.insert(url.to_string());
        self.failed_urls.remove(url);
        if let Some(path) = output_path {
            self.url_to_output_path.insert(
                url.to_string(),
                MappingEntry {
                    path: path.display().to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
        self.events.emit(&Event::UrlProcessed {
            url: url.to_string(),
        });
    }

    /// Records a URL as failed; the error is reduced to a string
    pub fn mark_failed(&mut self, url: &str, error: impl std::fmt::Display) {
        let message = error.to_string();
        self.processed_urls.remove(url);
        self.url_to_output_path.remove(url);
        self.failed_urls.insert(url.to_string(), message.clone());
        self.events.emit(&Event::UrlFailed {
            url: url.to_string(),
            error: message,
        });
    }

    /// Records an image-load defect; independent of page success/failure
    pub fn mark_image_load_failure(&mut self, url: &str) {
        self.image_load_failures.insert(url.to_string(), Utc::now());
        self.events.emit(&Event::ImageLoadFailure {
            url: url.to_string(),
        });
    }

    /// Assigns stable indexes to newly discovered URLs, keeping both
    /// directions of the map synchronized
    pub fn assign_indexes(&mut self, urls: &[String]) {
        let mut next_index = self
            .index_to_url
            .keys()
            .next_back()
            .map_or(0, |max| max + 1);
        for url in urls {
            if !self.url_to_index.contains_key(url) {
                self.url_to_index.insert(url.clone(), next_index);
                self.index_to_url.insert(next_index, url.clone());
                next_index += 1;
            }
        }
    }

    pub fn index_of(&self, url: &str) -> Option<usize> {
        self.url_to_index.get(url).copied()
    }

    pub fn url_at(&self, index: usize) -> Option<&str> {
        self.index_to_url.get(&index).map(String::as_str)
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.processed_urls.contains(url)
    }

    pub fn is_failed(&self, url: &str) -> bool {
        self.failed_urls.contains_key(url)
    }

    /// Currently-failed URLs with their recorded error messages
    pub fn failed_urls(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .failed_urls
            .iter()
            .map(|(url, error)| (url.clone(), error.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn output_path(&self, url: &str) -> Option<PathBuf> {
        self.url_to_output_path
            .get(url)
            .map(|entry| PathBuf::from(&entry.path))
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Current progress counters
    pub fn stats(&self) -> CrawlStats {
        let total = self.url_to_index.len();
        let processed = self.processed_urls.len();
        let failed = self.failed_urls.len();
        let attempted = processed + failed;
        let success_rate = if attempted > 0 {
            processed as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };
        CrawlStats {
            total,
            processed,
            failed,
            pending: total.saturating_sub(attempted),
            image_load_failures: self.image_load_failures.len(),
            success_rate,
            elapsed_secs: (Utc::now() - self.start_time).num_seconds().max(0) as u64,
        }
    }

    /// Clears all in-memory fields for a fresh run against the same backing
    /// target; nothing is persisted until the next save
    pub fn reset(&mut self) {
        self.processed_urls.clear();
        self.failed_urls.clear();
        self.url_to_index.clear();
        self.index_to_url.clear();
        self.image_load_failures.clear();
        self.url_to_output_path.clear();
        self.start_time = Utc::now();
        self.last_persist = None;
        tracing::info!("crawl state reset");
    }
}

/// Spawns the periodic save timer
///
/// Save errors are caught and logged, never propagated. The caller aborts
/// the returned handle during cleanup.
pub fn spawn_autosave(
    state: Arc<tokio::sync::Mutex<CrawlState>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut state = state.lock().await;
            if let Err(err) = state.save(false).await {
                tracing::warn!("periodic state save failed: {}", err);
            }
        }
    })
}
