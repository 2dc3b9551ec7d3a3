//! Resumable job state.
//!
//! A snapshot is a plain JSON object written to
//! `<output-dir>/<id>.state.json`. The writer drains the frontier into
//! `pending_urls` before serializing, so the on-disk copy always matches an
//! in-memory state where the outstanding-work counter was zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::STATE_FILE_SUFFIX;
use crate::models::{CrawlConfig, StatsSnapshot};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub id: String,
    pub root_url: String,
    pub pending_urls: Vec<String>,
    pub depth_map: HashMap<String, u32>,
    pub stats: StatsSnapshot,
    pub config: CrawlConfig,
}

impl JobState {
    /// Location of the state file for a job id under the output directory.
    pub fn file_path(output_dir: &Path, id: &str) -> PathBuf {
        output_dir.join(format!("{id}{STATE_FILE_SUFFIX}"))
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_state() -> JobState {
        let mut depth_map = HashMap::new();
        depth_map.insert("https://ex.com/".to_string(), 0);
        depth_map.insert("https://ex.com/a/".to_string(), 1);
        depth_map.insert("https://ex.com/b/".to_string(), 1);

        JobState {
            id: "deadbeef".to_string(),
            root_url: "https://ex.com/".to_string(),
            pending_urls: vec!["https://ex.com/b/".to_string()],
            depth_map,
            stats: StatsSnapshot {
                total_files: 2,
                downloaded_bytes: 2048,
                failed: 0,
                skipped: 1,
            },
            config: CrawlConfig::default(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = sample_state();
        let path = JobState::file_path(dir.path(), &state.id);

        state.save(&path).unwrap();
        let loaded = JobState::load(&path).unwrap();

        assert_eq!(loaded.id, state.id);
        assert_eq!(loaded.root_url, state.root_url);
        assert_eq!(loaded.pending_urls, state.pending_urls);
        assert_eq!(loaded.depth_map, state.depth_map);
        assert_eq!(loaded.stats, state.stats);
        assert_eq!(loaded.config.workers, state.config.workers);
    }

    #[test]
    fn test_file_path_uses_suffix() {
        let path = JobState::file_path(Path::new("out"), "deadbeef");
        assert_eq!(path, Path::new("out/deadbeef.state.json"));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(JobState::load(&dir.path().join("nope.state.json")).is_err());
    }

    #[test]
    fn test_load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JobState::load(&path),
            Err(StateError::Serde(_))
        ));
    }
}
