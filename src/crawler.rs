//! Concurrent recursive crawl of a single origin.
//!
//! The crawl is a bounded producer/consumer BFS: symmetric worker tasks pull
//! canonical URLs from a bounded frontier, fetch, transform, save, and feed
//! newly discovered links back in. The visited set breaks cycles and the
//! depth map bounds unbounded paths; revisits are normal, not errors.
//!
//! The frontier closes when the outstanding-work counter reaches zero, not
//! when the queue is momentarily empty: workers may still be producing
//! links for URLs they are processing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FRONTIER_CAPACITY;
use crate::events::EventSink;
use crate::filter::UrlFilter;
use crate::mapper;
use crate::models::{content_digest, job_id, CrawlConfig, FileMetadata, JobStats, StatsSnapshot};
use crate::network::{FetchError, Fetcher};
use crate::parser::ContentParser;
use crate::rewrite::{self, ContentHandler};
use crate::state::{JobState, StateError};
use crate::strategy;
use crate::url_utils;

/// Well-known paths seeded at job start to improve site coverage.
pub const DISCOVERY_PATHS: &[&str] = &[
    "/404",
    "/404.html",
    "/robots.txt",
    "/sitemap.xml",
    "/favicon.ico",
    "/apple-touch-icon.png",
    "/manifest.json",
];

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid root URL: {0}")]
    InvalidRootUrl(#[from] url::ParseError),

    #[error("root URL has no host")]
    MissingHost,

    #[error("cannot prepare output directory: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Counter of tasks that are either queued or executing. The frontier may
/// close only when this reaches zero.
#[derive(Debug, Default)]
struct WorkGroup {
    active: AtomicI64,
    zero: Notify,
}

impl WorkGroup {
    fn add(&self, n: i64) {
        self.active.fetch_add(n, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }

    fn count(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    async fn wait_zero(&self) {
        loop {
            // Register interest before checking so a concurrent `done` is
            // never missed.
            let notified = self.zero.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Maps guarded by the single job-wide mutex. Critical sections are minimal:
/// check-and-mark for visited, read/write of a depth entry.
#[derive(Debug, Default)]
struct SharedMaps {
    visited: HashSet<String>,
    depths: HashMap<String, u32>,
    /// Content digests seen this job. Statistics only; storage is never
    /// gated on it, distinct URLs are distinct artifacts even when bytes
    /// match.
    digests: HashSet<String>,
}

/// One mirroring job: configuration, shared state, and the worker pool.
pub struct Job {
    pub id: String,
    pub root_url: String,
    pub config: CrawlConfig,
    pub stats: JobStats,

    filter: UrlFilter,
    handlers: Vec<ContentHandler>,
    fetcher: Fetcher,

    frontier_tx: mpsc::Sender<String>,
    frontier_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    shared: parking_lot::Mutex<SharedMaps>,
    outstanding: WorkGroup,

    cancel: CancellationToken,
    frontier_done: CancellationToken,
    events: EventSink,
    state_file: PathBuf,
    started: Instant,
}

impl Job {
    /// Create a job for a root URL. If a state file for this root already
    /// exists in the output directory the job resumes from it; otherwise the
    /// frontier is seeded with the normalized root and the discovery list.
    pub fn new(root_url: &str, config: CrawlConfig, events: EventSink) -> Result<Arc<Self>, JobError> {
        let normalized_root = url_utils::normalize(root_url)?;
        if normalized_root.host_str().is_none() {
            return Err(JobError::MissingHost);
        }

        std::fs::create_dir_all(&config.output_dir)?;

        let id = job_id(root_url);
        let job = Self::build(id, normalized_root.to_string(), config, events)?;

        match JobState::load(&job.state_file) {
            Ok(state) => {
                job.restore(&state);
                tracing::info!(id = %job.id, "resumed job from state file");
            }
            Err(_) => {
                job.seed_frontier(&normalized_root);
                tracing::info!(id = %job.id, root = %normalized_root, "new job started");
            }
        }

        Ok(job)
    }

    /// Resume a job by id. The state file must exist and parse; a corrupt
    /// file is a fatal setup error.
    pub fn resume(job_id: &str, config: CrawlConfig, events: EventSink) -> Result<Arc<Self>, JobError> {
        let state_file = JobState::file_path(Path::new(&config.output_dir), job_id);
        let state = JobState::load(&state_file)?;

        std::fs::create_dir_all(&config.output_dir)?;

        // Filters, parsers, and handlers are reconstructed from the stored
        // config; only the state-file location comes from the caller.
        let mut stored_config = state.config.clone();
        stored_config.output_dir = config.output_dir.clone();

        let job = Self::build(
            state.id.clone(),
            state.root_url.clone(),
            stored_config,
            events,
        )?;
        job.restore(&state);
        tracing::info!(id = %job.id, root = %job.root_url, "resuming job");
        Ok(job)
    }

    fn build(
        id: String,
        root_url: String,
        config: CrawlConfig,
        events: EventSink,
    ) -> Result<Arc<Self>, JobError> {
        let parsed_root = Url::parse(&root_url)?;
        let filter = UrlFilter::from_root(&parsed_root);
        let fetcher = Fetcher::new(&config)?;
        let state_file = JobState::file_path(Path::new(&config.output_dir), &id);
        let (frontier_tx, frontier_rx) = mpsc::channel(FRONTIER_CAPACITY);

        Ok(Arc::new(Self {
            id,
            root_url,
            config,
            stats: JobStats::default(),
            filter,
            handlers: rewrite::default_handlers(),
            fetcher,
            frontier_tx,
            frontier_rx: tokio::sync::Mutex::new(frontier_rx),
            shared: parking_lot::Mutex::new(SharedMaps::default()),
            outstanding: WorkGroup::default(),
            cancel: CancellationToken::new(),
            frontier_done: CancellationToken::new(),
            events,
            state_file,
            started: Instant::now(),
        }))
    }

    /// Token observed by workers at every suspension point. Cancel it for a
    /// graceful shutdown with a final state snapshot.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn seed_frontier(&self, root: &Url) {
        self.seed(root.to_string(), 0);
        for path in DISCOVERY_PATHS {
            if let Ok(seed_url) = root.join(path) {
                self.seed(seed_url.to_string(), 0);
            }
        }
    }

    /// Accept a URL into the frontier at job start. Seeds bypass the filter;
    /// they are explicit well-known paths.
    fn seed(&self, url: String, depth: u32) {
        {
            let mut shared = self.shared.lock();
            if shared.visited.contains(&url) {
                return;
            }
            shared.visited.insert(url.clone());
            shared.depths.insert(url.clone(), depth);
        }
        self.outstanding.add(1);
        if self.frontier_tx.try_send(url).is_err() {
            self.outstanding.done();
        }
    }

    fn restore(&self, state: &JobState) {
        {
            let mut shared = self.shared.lock();
            for (url, depth) in &state.depth_map {
                shared.visited.insert(url.clone());
                shared.depths.insert(url.clone(), *depth);
            }
        }
        self.stats.restore(&state.stats);
        for url in &state.pending_urls {
            self.outstanding.add(1);
            if self.frontier_tx.try_send(url.clone()).is_err() {
                self.outstanding.done();
            }
        }
    }

    /// Run the crawl to completion (or cancellation) and return the final
    /// counters. A final state snapshot is always written.
    pub async fn run(self: &Arc<Self>) -> StatsSnapshot {
        // Close the frontier once every queued-or-executing unit is done.
        let closer = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closer.outstanding.wait_zero() => closer.frontier_done.cancel(),
                _ = closer.cancel.cancelled() => {}
            }
        });

        let reporter_job = self.clone();
        let reporter = tokio::spawn(async move { reporter_job.progress_reporter().await });

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            let job = self.clone();
            workers.spawn(async move { job.worker_loop().await });
        }
        while workers.join_next().await.is_some() {}

        self.cancel.cancel();
        let _ = reporter.await;

        if let Err(e) = self.save_state().await {
            tracing::error!(error = %e, "failed to save job state");
        }

        self.events.emit("✅ Download completed successfully!");
        tracing::info!(id = %self.id, "download completed, links rewritten for local viewing");
        self.stats.snapshot()
    }

    async fn worker_loop(&self) {
        while let Some(url) = self.next_url().await {
            self.process_url(&url).await;
            self.outstanding.done();
        }
    }

    async fn next_url(&self) -> Option<String> {
        let mut rx = self.frontier_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            _ = self.frontier_done.cancelled() => None,
            url = rx.recv() => url,
        }
    }

    async fn process_url(&self, url_str: &str) {
        let depth = self.shared.lock().depths.get(url_str).copied().unwrap_or(0);
        self.events
            .emit(format!("[Info] Processing: {url_str} (depth {depth})"));
        tracing::info!(url = url_str, depth, "processing");

        if depth > self.config.max_depth {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(url = url_str, "max depth reached");
            return;
        }

        let (content, content_type) = match self.fetcher.fetch(url_str, &self.cancel).await {
            Ok(result) => result,
            Err(FetchError::Cancelled) => return,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.events.emit(format!("[Error] {e}"));
                tracing::warn!(url = url_str, error = %e, "download failed");
                return;
            }
        };

        let digest = content_digest(&content);
        self.shared.lock().digests.insert(digest.clone());

        let meta = FileMetadata {
            url: url_str.to_string(),
            content_type: content_type.clone(),
            digest,
            depth,
        };

        // Handlers transform a copy; link discovery below uses the original
        // bytes so rewritten paths never leak into the frontier.
        let mut transformed = content.clone();
        for handler in &self.handlers {
            match handler.handle(&transformed, &meta) {
                Ok(bytes) => transformed = bytes,
                Err(e) => {
                    tracing::warn!(url = url_str, error = %e, "content handler failed");
                }
            }
        }

        let parsed = match Url::parse(url_str) {
            Ok(u) => u,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(url = url_str, error = %e, "unparseable URL at save time");
                return;
            }
        };

        let save_strategy = strategy::analyze(parsed.path(), &content_type, &content);
        let path = mapper::save_path(Path::new(&self.config.output_dir), &parsed, save_strategy);
        if let Err(e) = write_file(&path, &transformed).await {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.events.emit(format!("[Error] save failed: {e}"));
            tracing::warn!(url = url_str, path = %path.display(), error = %e, "save failed");
            return;
        }

        self.stats.total_files.fetch_add(1, Ordering::Relaxed);
        self.stats
            .downloaded_bytes
            .fetch_add(content.len() as i64, Ordering::Relaxed);
        self.events.emit(format!("[Done] Saved: {url_str}"));
        tracing::info!(url = url_str, path = %path.display(), "saved");

        if depth < self.config.max_depth {
            self.collect_links(&content, &content_type, &parsed, depth)
                .await;
        }
    }

    async fn collect_links(&self, content: &[u8], content_type: &str, base: &Url, depth: u32) {
        let Some(parser) = ContentParser::all()
            .into_iter()
            .find(|p| p.can_parse(content_type))
        else {
            return;
        };

        let links = parser.parse(content, base);
        tracing::debug!(url = %base, count = links.len(), "extracted raw links");

        for raw in links {
            let Ok(normalized) = url_utils::normalize(&raw) else {
                tracing::debug!(link = %raw, "skipping unparseable link");
                continue;
            };
            let normalized = normalized.to_string();

            if !self.filter.should_download(&normalized) {
                tracing::debug!(
                    url = %normalized,
                    reason = self.filter.filter_reason(&normalized),
                    "filtered out"
                );
                continue;
            }

            self.enqueue(normalized, depth + 1).await;
        }
    }

    /// Atomically mark a URL visited and put it on the frontier. Blocks when
    /// the frontier is full; a lost race against cancellation undoes the
    /// outstanding-work increment.
    async fn enqueue(&self, url: String, depth: u32) {
        {
            let mut shared = self.shared.lock();
            if shared.visited.contains(&url) {
                return;
            }
            shared.visited.insert(url.clone());
            shared.depths.insert(url.clone(), depth);
        }

        self.outstanding.add(1);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.outstanding.done();
            }
            result = self.frontier_tx.send(url.clone()) => {
                if result.is_err() {
                    self.outstanding.done();
                } else {
                    tracing::debug!(url = %url, depth, "enqueued");
                }
            }
        }
    }

    async fn progress_reporter(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = self.started.elapsed().as_secs_f64();
                    let bytes = self.stats.downloaded_bytes.load(Ordering::Relaxed) as f64;
                    let speed = if elapsed > 0.0 { bytes / elapsed } else { 0.0 };
                    let line = format!(
                        "Файлов: {} | Скорость: {:.2} KB/s | В очереди: {}",
                        self.stats.total_files.load(Ordering::Relaxed),
                        speed / 1024.0,
                        self.queue_len(),
                    );
                    self.events.emit(line.clone());
                    tracing::info!("{line}");
                }
            }
        }
    }

    fn queue_len(&self) -> usize {
        FRONTIER_CAPACITY - self.frontier_tx.capacity()
    }

    /// Write a snapshot of the job to `<output-dir>/<id>.state.json`.
    ///
    /// The frontier is drained into a slice and rebuilt before serializing,
    /// so the stored pending list is exactly the queue content.
    pub async fn save_state(&self) -> Result<(), StateError> {
        let mut pending = Vec::new();
        {
            let mut rx = self.frontier_rx.lock().await;
            while let Ok(url) = rx.try_recv() {
                pending.push(url);
            }
        }
        for url in &pending {
            let _ = self.frontier_tx.try_send(url.clone());
        }

        let depth_map = self.shared.lock().depths.clone();
        let state = JobState {
            id: self.id.clone(),
            root_url: self.root_url.clone(),
            pending_urls: pending,
            depth_map,
            stats: self.stats.snapshot(),
            config: self.config.clone(),
        };
        state.save(&self.state_file)?;
        tracing::info!(path = %self.state_file.display(), "state saved");
        Ok(())
    }

    #[cfg(test)]
    fn visited_contains(&self, url: &str) -> bool {
        self.shared.lock().visited.contains(url)
    }

    #[cfg(test)]
    fn depth_of(&self, url: &str) -> Option<u32> {
        self.shared.lock().depths.get(url).copied()
    }

    #[cfg(test)]
    fn outstanding_count(&self) -> i64 {
        self.outstanding.count()
    }
}

async fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> CrawlConfig {
        CrawlConfig {
            output_dir: dir.path().to_string_lossy().to_string(),
            workers: 2,
            ..CrawlConfig::default()
        }
    }

    fn new_job(dir: &TempDir, root: &str) -> Arc<Job> {
        let (events, _rx) = EventSink::channel();
        Job::new(root, test_config(dir), events).unwrap()
    }

    #[tokio::test]
    async fn test_seeds_root_and_discovery_list() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");

        assert!(job.visited_contains("https://ex.com/"));
        assert!(job.visited_contains("https://ex.com/404"));
        assert!(job.visited_contains("https://ex.com/robots.txt"));
        assert!(job.visited_contains("https://ex.com/manifest.json"));
        assert_eq!(job.depth_of("https://ex.com/404"), Some(0));
        assert_eq!(
            job.outstanding_count(),
            1 + DISCOVERY_PATHS.len() as i64
        );
        assert_eq!(job.queue_len(), 1 + DISCOVERY_PATHS.len());
    }

    #[tokio::test]
    async fn test_job_id_is_stable_digest_prefix() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");
        assert_eq!(job.id.len(), 8);
        assert_eq!(job.id, job_id("https://ex.com/"));
    }

    #[tokio::test]
    async fn test_enqueue_is_exactly_once() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");
        let before = job.outstanding_count();

        job.enqueue("https://ex.com/page/".to_string(), 1).await;
        job.enqueue("https://ex.com/page/".to_string(), 1).await;

        assert_eq!(job.outstanding_count(), before + 1);
        assert_eq!(job.depth_of("https://ex.com/page/"), Some(1));
    }

    #[tokio::test]
    async fn test_frontier_is_subset_of_visited() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/blog/");
        job.enqueue("https://ex.com/blog/a/".to_string(), 1).await;

        let mut rx = job.frontier_rx.lock().await;
        while let Ok(url) = rx.try_recv() {
            assert!(job.shared.lock().visited.contains(&url));
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_cancel_undoes_counter() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");
        let before = job.outstanding_count();

        job.cancel.cancel();
        // Fill the frontier so the send side must block and lose the race.
        while job.frontier_tx.try_send("https://ex.com/filler".into()).is_ok() {}
        job.enqueue("https://ex.com/late/".to_string(), 1).await;

        assert_eq!(job.outstanding_count(), before);
    }

    #[tokio::test]
    async fn test_save_state_round_trip() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");
        job.enqueue("https://ex.com/a/".to_string(), 1).await;
        job.save_state().await.unwrap();

        let state = JobState::load(&job.state_file).unwrap();
        assert_eq!(state.id, job.id);
        assert_eq!(state.root_url, "https://ex.com/");
        assert!(state.pending_urls.contains(&"https://ex.com/a/".to_string()));
        assert_eq!(state.depth_map.get("https://ex.com/a/"), Some(&1));
        // Every pending URL is present in the depth map (and thus visited).
        for url in &state.pending_urls {
            assert!(state.depth_map.contains_key(url));
        }
    }

    #[tokio::test]
    async fn test_save_state_rebuilds_frontier() {
        let dir = TempDir::new().unwrap();
        let job = new_job(&dir, "https://ex.com/");
        let before = job.queue_len();
        job.save_state().await.unwrap();
        assert_eq!(job.queue_len(), before);
    }

    #[tokio::test]
    async fn test_resume_restores_pending_and_depths() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        {
            let job = new_job(&dir, "https://ex.com/");
            job.enqueue("https://ex.com/child/".to_string(), 1).await;
            job.save_state().await.unwrap();
        }

        let (events, _rx) = EventSink::channel();
        let resumed = Job::resume(&job_id("https://ex.com/"), config, events).unwrap();

        assert!(resumed.visited_contains("https://ex.com/child/"));
        assert_eq!(resumed.depth_of("https://ex.com/child/"), Some(1));
        assert_eq!(
            resumed.outstanding_count() as usize,
            resumed.queue_len()
        );
        // Nothing already visited may be re-fetched: the whole depth map is
        // marked visited, only pending URLs are queued.
        assert!(resumed.queue_len() <= 2 + DISCOVERY_PATHS.len());
    }

    #[tokio::test]
    async fn test_resume_missing_state_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (events, _rx) = EventSink::channel();
        assert!(Job::resume("0badc0de", test_config(&dir), events).is_err());
    }

    #[tokio::test]
    async fn test_work_group_waits_for_zero() {
        let group = Arc::new(WorkGroup::default());
        group.add(2);

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.wait_zero().await })
        };

        group.done();
        assert!(!waiter.is_finished());
        group.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_zero should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_work_group_zero_returns_immediately() {
        let group = WorkGroup::default();
        tokio::time::timeout(Duration::from_millis(100), group.wait_zero())
            .await
            .expect("empty group resolves at once");
    }
}
