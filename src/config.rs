//! Crawl defaults and configuration loading.
//!
//! Values resolve in priority order: CLI flag, then `config.yaml` in the
//! working directory, then the built-in default.

use serde::Deserialize;
use std::path::Path;

use crate::models::CrawlConfig;

pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_MAX_DEPTH: u32 = 30;
pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 15 * 1024 * 1024;
pub const DEFAULT_OUTPUT_DIR: &str = "./downloads";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const STATE_FILE_SUFFIX: &str = ".state.json";
pub const FRONTIER_CAPACITY: usize = 5000;

/// Per-crawl values a CLI invocation may override.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub workers: Option<usize>,
    pub max_depth: Option<u32>,
    pub retries: Option<u32>,
    pub delay_ms: Option<u64>,
    pub max_file_size: Option<u64>,
    pub output_dir: Option<String>,
    pub user_agent: Option<String>,
}

/// Optional keys read from `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    workers: Option<usize>,
    max_depth: Option<u32>,
    retries: Option<u32>,
    delay: Option<u64>,
    max_file_size: Option<u64>,
    output_dir: Option<String>,
    user_agent: Option<String>,
}

fn read_file_config(dir: &Path) -> FileConfig {
    let path = dir.join(CONFIG_FILE_NAME);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return FileConfig::default();
    };
    match serde_yaml::from_str(&raw) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            FileConfig::default()
        }
    }
}

/// Resolve the effective configuration from CLI overrides, the config file
/// in the working directory, and defaults.
pub fn load_config(overrides: &CliOverrides) -> CrawlConfig {
    load_config_from(overrides, Path::new("."))
}

fn load_config_from(overrides: &CliOverrides, dir: &Path) -> CrawlConfig {
    let file = read_file_config(dir);
    CrawlConfig {
        workers: overrides
            .workers
            .or(file.workers)
            .unwrap_or(DEFAULT_WORKERS),
        max_depth: overrides
            .max_depth
            .or(file.max_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH),
        retries: overrides
            .retries
            .or(file.retries)
            .unwrap_or(DEFAULT_RETRIES),
        delay_ms: overrides
            .delay_ms
            .or(file.delay)
            .unwrap_or(DEFAULT_DELAY_MS),
        max_file_size: overrides
            .max_file_size
            .or(file.max_file_size)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE),
        output_dir: overrides
            .output_dir
            .clone()
            .or(file.output_dir)
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        user_agent: overrides
            .user_agent
            .clone()
            .or(file.user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
    }
}
