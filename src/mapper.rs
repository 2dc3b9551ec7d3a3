//! URL → on-disk path mapping.
//!
//! The mapper is deterministic and purely lexical: given an output root, a
//! URL, and a save strategy it produces the absolute file path for the
//! content. The same mapping, applied to the URL path alone, is what the
//! link rewriter uses to relate two URLs on disk.

use std::path::{Path, PathBuf};
use url::Url;

use crate::strategy::{self, SaveStrategy, PAGE_EXTENSIONS};

/// Remove dot segments from a slash-separated path. The result has no
/// leading slash and no `.`/`..` segments.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Map a URL path to its path on disk, relative to the host directory.
/// Always slash-separated, never empty.
pub fn disk_relpath(url_path: &str, strategy: SaveStrategy) -> String {
    let cleaned = clean_path(url_path);
    if cleaned.is_empty() {
        return "index.html".to_string();
    }

    match strategy {
        SaveStrategy::FileOnly => cleaned,
        SaveStrategy::DirectoryIndex => {
            let mut segments: Vec<String> = cleaned.split('/').map(String::from).collect();
            if let Some(last) = segments.pop() {
                let lower = last.to_ascii_lowercase();
                match PAGE_EXTENSIONS.iter().find(|e| lower.ends_with(**e)) {
                    Some(ext) => {
                        // Strip the page extension; a bare `index` collapses
                        // into its directory.
                        let name = &last[..last.len() - ext.len()];
                        if !name.is_empty() && !name.eq_ignore_ascii_case("index") {
                            segments.push(name.to_string());
                        }
                    }
                    None => {
                        if !last.eq_ignore_ascii_case("index") {
                            segments.push(last);
                        }
                    }
                }
            }
            segments.push("index.html".to_string());
            segments.join("/")
        }
    }
}

/// Map a URL path to disk with a strategy inferred from the path alone.
/// This is the mapping both ends of the link rewriter agree on.
pub fn disk_relpath_inferred(url_path: &str) -> String {
    disk_relpath(url_path, strategy::analyze_path(url_path))
}

/// Absolute save path for a URL under the output root:
/// `<root>/<host>/<disk path>`.
pub fn save_path(output_root: &Path, url: &Url, strategy: SaveStrategy) -> PathBuf {
    let mut path = output_root.join(url.host_str().unwrap_or_default());
    for segment in disk_relpath(url.path(), strategy).split('/') {
        path.push(segment);
    }
    path
}
