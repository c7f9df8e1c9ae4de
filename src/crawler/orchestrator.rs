//! Crawl orchestration
//!
//! The orchestrator drives every discovered URL through the task queue and
//! the retry framework, updates the persisted crawl state, and reports
//! progress through the event bus. Per-URL failures are caught, classified
//! and recorded; they never abort the overall run. Only programmer errors
//! (running twice concurrently, collecting URLs before initialization)
//! raise synchronously.

use crate::config::Config;
use crate::crawler::collector::{self, CollectedUrls};
use crate::crawler::metadata::MetadataStore;
use crate::crawler::navigation::{navigate_with_fallback, navigation_error, NavigationOutcome};
use crate::crawler::page::{ArtifactOptions, Page, PageError, Renderer};
use crate::crawler::url_filter::UrlFilter;
use crate::crawler::url_status::UrlStatus;
use crate::events::{Event, EventBus};
use crate::queue::{task_op, QueueOptions, TaskQueue, TaskSpec};
use crate::retry::{categorize, retry_with_hook, JitterStrategy, RetryOptions};
use crate::state::{spawn_autosave, CrawlState, CrawlStats, JsonStore};
use crate::{Result, ShioriError};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// Page script extracting the main article text
const CONTENT_EXTRACTION_SCRIPT: &str = "(() => { \
     const article = document.querySelector('article, main, [role=\"main\"]'); \
     return article ? article.innerText : document.body.innerText; })()";

/// Page script invoking the in-page translation hook, when one is installed
const TRANSLATION_SCRIPT: &str =
    "window.__translatePage ? window.__translatePage() : true";

/// Page script listing images that finished loading with no pixel data
const IMAGE_AUDIT_SCRIPT: &str = "Array.from(document.images) \
     .filter((img) => img.complete && img.naturalWidth === 0) \
     .map((img) => img.src)";

/// End-of-run accounting; a run always produces one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// URLs that went through the transient-failure retry pass
    pub retried: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn empty(elapsed: Duration) -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            retried: 0,
            elapsed,
        }
    }
}

/// The crawl orchestrator
pub struct Orchestrator {
    config: Arc<Config>,
    pipeline: Arc<UrlPipeline>,
    filter: Arc<UrlFilter>,
    queue: TaskQueue<UrlStatus>,
    events: Arc<EventBus>,
    state: Arc<Mutex<CrawlState>>,
    config_hash: Option<String>,
    initialized: AtomicBool,
    running: AtomicBool,
    autosave: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        renderer: Arc<dyn Renderer>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::new());

        // the state and queue own private buses; their events pass through
        // onto the public one
        let state_events = Arc::new(EventBus::new());
        {
            let public = events.clone();
            state_events.on_any(move |event| public.emit(event));
        }
        let state = Arc::new(Mutex::new(CrawlState::new(
            JsonStore::new(&config.output.metadata_dir),
            state_events,
        )));

        let queue = TaskQueue::new(QueueOptions {
            concurrency: config.queue.concurrency,
            interval: Duration::from_millis(config.queue.interval_ms),
            interval_cap: config.queue.interval_cap,
            // page tasks own their timeouts at every sub-operation; a queue
            // timeout on top would double-count slow-but-progressing pages
            task_timeout: None,
            throw_on_timeout: config.queue.throw_on_timeout,
            max_task_history: config.queue.max_task_history,
        });
        {
            let public = events.clone();
            queue.events().on_any(move |event| public.emit(event));
        }

        let filter = Arc::new(UrlFilter::from_config(&config));
        let pipeline = Arc::new(UrlPipeline {
            config: config.clone(),
            renderer,
            metadata,
            state: state.clone(),
            events: events.clone(),
        });

        Self {
            config,
            pipeline,
            filter,
            queue,
            events,
            state,
            config_hash: None,
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            autosave: StdMutex::new(None),
        }
    }

    /// Records the configuration hash to persist with crawl progress
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// The orchestrator's public event bus, including passthrough of queue
    /// and state events
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The shared crawl state (single writer: this orchestrator)
    pub fn state(&self) -> Arc<Mutex<CrawlState>> {
        self.state.clone()
    }

    /// Current progress counters
    pub async fn stats(&self) -> CrawlStats {
        self.state.lock().await.stats()
    }

    /// Loads persisted state and starts the autosave timer
    ///
    /// Idempotent: a second call warns and does nothing.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!("orchestrator already initialized");
            return Ok(());
        }

        {
            let mut state = self.state.lock().await;
            if let Some(hash) = &self.config_hash {
                state.set_config_hash(hash.clone());
            }
            state.load().await;
        }

        let interval = Duration::from_secs(self.config.crawler.state_save_interval_secs);
        let handle = spawn_autosave(self.state.clone(), interval);
        *self.autosave.lock().expect("autosave lock poisoned") = Some(handle);

        self.events.emit(&Event::Initialized);
        tracing::info!("orchestrator initialized");
        Ok(())
    }

    /// Discovers URLs from every configured entry point
    pub async fn collect_urls(&self) -> Result<CollectedUrls> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ShioriError::NotInitialized);
        }

        let collected =
            collector::collect_urls(&*self.pipeline.renderer, &self.config, &self.filter).await;

        if let Err(err) = self
            .pipeline
            .metadata
            .save_section_structure(&collected.sections)
            .await
        {
            tracing::warn!("could not persist section structure: {:#}", err);
        }

        self.events.emit(&Event::UrlsCollected {
            total_urls: collected.urls.len(),
            duplicates: collected.duplicates,
            sections: collected.sections.len(),
        });
        Ok(collected)
    }

    /// Runs a full crawl: discovery, dispatch, retry pass, persistence
    ///
    /// A concurrent call while a run is active fails fast. Cleanup runs on
    /// both the success and the failure path, and the running flag always
    /// resets.
    pub async fn run(&self) -> Result<RunSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ShioriError::AlreadyRunning);
        }

        let started = Instant::now();
        let result = self.run_inner(started).await;
        self.cleanup().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, started: Instant) -> Result<RunSummary> {
        self.initialize().await?;

        let collected = self.collect_urls().await?;
        if collected.urls.is_empty() {
            tracing::warn!(
                "no URLs discovered from {} entry point(s); nothing to do",
                self.config.entry_points.len()
            );
            let summary = RunSummary::empty(started.elapsed());
            self.emit_summary(&summary);
            return Ok(summary);
        }

        let urls: Vec<String> = collected.urls.iter().map(|d| d.url.clone()).collect();
        {
            let mut state = self.state.lock().await;
            state.assign_indexes(&urls);
        }

        tracing::info!(
            "dispatching {} URL(s) at concurrency {}",
            urls.len(),
            self.config.queue.concurrency
        );
        let outcomes = self.dispatch_urls(&urls, false).await;

        let mut summary = RunSummary::empty(Duration::ZERO);
        summary.total = urls.len();
        let mut retry_urls = Vec::new();
        for (url, outcome) in urls.iter().zip(&outcomes) {
            match outcome {
                UrlStatus::Success => summary.succeeded += 1,
                UrlStatus::Skipped => summary.skipped += 1,
                UrlStatus::PendingRetry => retry_urls.push(url.clone()),
                _ => summary.failed += 1,
            }
        }

        if !retry_urls.is_empty() {
            tracing::info!(
                "re-dispatching {} URL(s) after transient failures",
                retry_urls.len()
            );
            summary.retried = retry_urls.len();
            for outcome in self.dispatch_urls(&retry_urls, true).await {
                match outcome {
                    UrlStatus::Success => summary.succeeded += 1,
                    UrlStatus::Skipped => summary.skipped += 1,
                    _ => summary.failed += 1,
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Err(err) = state.save(true).await {
                tracing::warn!("end-of-run state save failed: {}", err);
            }
        }

        summary.elapsed = started.elapsed();
        self.emit_summary(&summary);
        Ok(summary)
    }

    /// Re-dispatches every currently-failed, still-discovered URL
    ///
    /// Each goes through the same per-URL path with the retry flag set, so
    /// a second failure is terminal at this layer.
    pub async fn retry_failed_urls(&self) -> Result<RunSummary> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ShioriError::NotInitialized);
        }

        let started = Instant::now();
        let failed_urls: Vec<String> = {
            let state = self.state.lock().await;
            state
                .failed_urls()
                .into_iter()
                .map(|(url, _)| url)
                .filter(|url| state.index_of(url).is_some())
                .collect()
        };

        if failed_urls.is_empty() {
            tracing::info!("no failed URLs to retry");
            return Ok(RunSummary::empty(started.elapsed()));
        }

        tracing::info!("retrying {} previously failed URL(s)", failed_urls.len());
        let outcomes = self.dispatch_urls(&failed_urls, true).await;

        let mut summary = RunSummary::empty(Duration::ZERO);
        summary.total = failed_urls.len();
        summary.retried = failed_urls.len();
        for outcome in outcomes {
            match outcome {
                UrlStatus::Success => summary.succeeded += 1,
                UrlStatus::Skipped => summary.skipped += 1,
                _ => summary.failed += 1,
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Err(err) = state.save(true).await {
                tracing::warn!("post-retry state save failed: {}", err);
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            "retry pass finished: {} recovered, {} still failed",
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    /// Blocks new dispatch, awaits queue drain, then releases resources
    ///
    /// In-flight pages are never preempted; pending ones are dropped.
    pub async fn stop(&self) {
        tracing::info!("stop requested; draining in-flight work");
        self.queue.pause();
        self.queue.clear();
        self.queue.wait_for_idle().await;
        self.cleanup().await;
    }

    async fn cleanup(&self) {
        self.queue.pause();
        self.queue.clear();

        if let Some(handle) = self
            .autosave
            .lock()
            .expect("autosave lock poisoned")
            .take()
        {
            handle.abort();
        }

        if let Err(err) = self.pipeline.renderer.close().await {
            tracing::warn!("renderer close failed during cleanup: {}", err);
        }

        let mut state = self.state.lock().await;
        if let Err(err) = state.save(true).await {
            tracing::warn!("final state save failed: {}", err);
        }
    }

    /// Enqueues one task per URL and suspends until all have settled
    async fn dispatch_urls(&self, urls: &[String], is_retry: bool) -> Vec<UrlStatus> {
        // a previous run's cleanup leaves the queue paused
        self.queue.resume();
        let specs: Vec<TaskSpec<UrlStatus>> = urls
            .iter()
            .map(|url| {
                let pipeline = self.pipeline.clone();
                let url = url.clone();
                TaskSpec::new(
                    url.clone(),
                    task_op(move || async move { Ok(pipeline.process(&url, is_retry).await) }),
                )
            })
            .collect();

        let results = self.queue.add_batch(specs).await;
        self.queue.wait_for_idle().await;

        results
            .into_iter()
            .map(|result| result.unwrap_or(UrlStatus::Failed))
            .collect()
    }

    fn emit_summary(&self, summary: &RunSummary) {
        tracing::info!(
            "crawl completed: {} succeeded, {} failed, {} skipped of {} in {:?}",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.total,
            summary.elapsed
        );
        self.events.emit(&Event::RunCompleted {
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
        });
    }
}

/// The per-URL processing pipeline, shared across queue tasks
struct UrlPipeline {
    config: Arc<Config>,
    renderer: Arc<dyn Renderer>,
    metadata: Arc<dyn MetadataStore>,
    state: Arc<Mutex<CrawlState>>,
    events: Arc<EventBus>,
}

impl UrlPipeline {
    /// Drives one URL through its state machine and records the outcome
    ///
    /// Never raises; every failure is classified and reduced to a status.
    async fn process(&self, url: &str, is_retry: bool) -> UrlStatus {
        // idempotent resume: skip before any network or browser work
        let index = {
            let state = self.state.lock().await;
            if state.is_processed(url) {
                tracing::debug!("{} already processed, skipping", url);
                return UrlStatus::Skipped;
            }
            state.index_of(url).unwrap_or(0)
        };

        match self.process_inner(url, index).await {
            Ok(output_path) => {
                {
                    let mut state = self.state.lock().await;
                    state.mark_processed(url, Some(&output_path));
                    if let Err(err) = state.save(false).await {
                        tracing::warn!("state save after {} failed: {}", url, err);
                    }
                }
                self.events.emit(&Event::PageScraped {
                    url: url.to_string(),
                    index,
                    output_path: Some(output_path.display().to_string()),
                });
                UrlStatus::Success
            }
            Err(err) => {
                let category = categorize(&err);
                if category.is_retryable()
                    && self.config.crawler.url_retries_enabled
                    && !is_retry
                {
                    tracing::warn!(
                        "{} failed as {:?} ({:#}); queued for the retry pass",
                        url,
                        category,
                        err
                    );
                    return UrlStatus::PendingRetry;
                }

                let message = format!("{:#}", err);
                tracing::error!("{} failed terminally ({:?}): {}", url, category, message);
                {
                    let mut state = self.state.lock().await;
                    state.mark_failed(url, &message);
                    if let Err(save_err) = state.save(false).await {
                        tracing::warn!("state save after {} failed: {}", url, save_err);
                    }
                }
                if let Err(log_err) = self.metadata.log_failed_link(url, &message).await {
                    tracing::warn!("could not record failed link {}: {:#}", url, log_err);
                }
                UrlStatus::Failed
            }
        }
    }

    async fn process_inner(&self, url: &str, index: usize) -> anyhow::Result<PathBuf> {
        let page = self.renderer.acquire_page().await?;
        let result = self.drive_page(&*page, url, index).await;
        // the page is released whatever happened
        if let Err(err) = page.close().await {
            tracing::warn!("failed to release page for {}: {}", url, err);
        }
        result
    }

    /// Success only after extraction, artifact generation and title
    /// persistence have all durably completed; a late metadata failure
    /// yields a failed outcome, never a silently-claimed success
    async fn drive_page(&self, page: &dyn Page, url: &str, index: usize) -> anyhow::Result<PathBuf> {
        let timeout = Duration::from_millis(self.config.crawler.navigation_timeout_ms);
        match navigate_with_fallback(page, url, timeout).await {
            NavigationOutcome::Success { strategy } => {
                tracing::debug!("navigated to {} with {} wait", url, strategy);
            }
            NavigationOutcome::Failure { attempts } => {
                return Err(navigation_error(url, &attempts));
            }
        }

        if let Some(content) = self
            .evaluate_tolerant(page, CONTENT_EXTRACTION_SCRIPT, url)
            .await?
        {
            if content_is_empty(&content) {
                return Err(PageError::Validation {
                    url: url.to_string(),
                    message: "article content not found".to_string(),
                }
                .into());
            }
        }

        if self.config.translation.enabled {
            self.translate_page(page, url).await?;
        }

        self.audit_images(page, url).await;

        let output_path = self.artifact_path(url, index);
        page.generate_artifact(
            &output_path,
            &ArtifactOptions {
                format: self.config.output.artifact_format,
                ..ArtifactOptions::default()
            },
        )
        .await
        .with_context(|| format!("generating artifact for {}", url))?;

        let title = match page.title().await {
            Ok(title) if !title.trim().is_empty() => title,
            _ => fallback_title(url),
        };
        self.metadata
            .save_article_title(url, index, &title)
            .await
            .with_context(|| format!("persisting title for {}", url))?;

        Ok(output_path)
    }

    /// Evaluates a script, discarding known-benign in-page script errors
    ///
    /// Returns `Ok(None)` when the failure was ignorable.
    async fn evaluate_tolerant(
        &self,
        page: &dyn Page,
        script: &str,
        url: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        match page.evaluate(script).await {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                let err = anyhow::Error::from(err);
                if categorize(&err).is_ignorable() {
                    tracing::debug!("ignorable in-page script error on {}: {:#}", url, err);
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Runs the in-page translation hook under the segment retry cap
    ///
    /// Translation failures classify identically to navigation failures.
    async fn translate_page(&self, page: &dyn Page, url: &str) -> anyhow::Result<()> {
        let options = RetryOptions {
            max_attempts: self.config.translation.max_segment_retries,
            delay: Duration::from_millis(1000),
            backoff: 2.0,
            max_delay: Duration::from_millis(10000),
            jitter: JitterStrategy::Decorrelated,
        };
        let result = retry_with_hook(
            move || async move {
                page.evaluate(TRANSLATION_SCRIPT)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            },
            &options,
            |attempt, err, wait| {
                tracing::warn!(
                    "translation attempt {} failed: {:#}; waiting {:?}",
                    attempt,
                    err,
                    wait
                );
            },
        )
        .await;
        result.with_context(|| format!("translating {}", url))
    }

    /// Records broken images; an image defect does not imply page failure
    async fn audit_images(&self, page: &dyn Page, url: &str) {
        match page.evaluate(IMAGE_AUDIT_SCRIPT).await {
            Ok(value) => {
                let broken: Vec<String> = serde_json::from_value(value).unwrap_or_default();
                if !broken.is_empty() {
                    tracing::warn!("{} broken image(s) on {}", broken.len(), url);
                    self.state.lock().await.mark_image_load_failure(url);
                }
            }
            Err(err) => {
                tracing::debug!("image audit failed on {}: {}", url, err);
            }
        }
    }

    fn artifact_path(&self, url: &str, index: usize) -> PathBuf {
        let extension = self.config.output.artifact_format.extension();
        PathBuf::from(&self.config.output.artifact_dir).join(format!(
            "{:04}-{}.{}",
            index,
            url_slug(url),
            extension
        ))
    }
}

/// Filesystem-safe name derived from a URL's last path segment or host
fn url_slug(url: &str) -> String {
    let parsed = Url::parse(url).ok();
    let base = parsed
        .as_ref()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
        })
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| "page".to_string());

    let slug: String = base
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

/// Human-readable fallback when a page reports no title
fn fallback_title(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
                .or_else(|| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| url.to_string())
}

fn content_is_empty(content: &serde_json::Value) -> bool {
    match content {
        serde_json::Value::Null => true,
        serde_json::Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}
