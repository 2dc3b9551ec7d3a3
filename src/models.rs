use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};

/// Immutable per-job crawl configuration. Changing any field requires a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Number of concurrent worker tasks
    pub workers: usize,

    /// Maximum BFS depth from the root URL (root is depth 0)
    pub max_depth: u32,

    /// Retry attempts per URL before the fetch is counted as failed
    pub retries: u32,

    /// Base delay between retry attempts, in milliseconds
    pub delay_ms: u64,

    /// Per-file size cap in bytes
    pub max_file_size: u64,

    /// Output root directory for the mirror
    pub output_dir: String,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            retries: crate::config::DEFAULT_RETRIES,
            delay_ms: crate::config::DEFAULT_DELAY_MS,
            max_file_size: crate::config::DEFAULT_MAX_FILE_SIZE,
            output_dir: crate::config::DEFAULT_OUTPUT_DIR.to_string(),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Metadata handed to content handlers alongside the fetched bytes.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Canonical URL the content was fetched from
    pub url: String,

    /// Content-Type header value (may be empty)
    pub content_type: String,

    /// Hex-encoded SHA-256 of the original bytes
    pub digest: String,

    /// BFS depth of the URL
    pub depth: u32,
}

/// Live job counters. Updated atomically by workers; serialized via `snapshot()`.
#[derive(Debug, Default)]
pub struct JobStats {
    pub total_files: AtomicI64,
    pub downloaded_bytes: AtomicI64,
    pub failed: AtomicI64,
    pub skipped: AtomicI64,
}

impl JobStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_files: self.total_files.load(Ordering::Relaxed),
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn restore(&self, snapshot: &StatsSnapshot) {
        self.total_files.store(snapshot.total_files, Ordering::Relaxed);
        self.downloaded_bytes
            .store(snapshot.downloaded_bytes, Ordering::Relaxed);
        self.failed.store(snapshot.failed, Ordering::Relaxed);
        self.skipped.store(snapshot.skipped, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the job counters, as stored in the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_files: i64,
    pub downloaded_bytes: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Hex-encoded SHA-256 digest of the given bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable 8-hex-digit job identifier derived from the root URL.
pub fn job_id(root_url: &str) -> String {
    content_digest(root_url.as_bytes())[..8].to_string()
}
