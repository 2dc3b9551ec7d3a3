//! Mirror index for the post-processor.
//!
//! One pre-walk of the downloaded mirror builds the maps the link resolver
//! needs: synthesized URL path → file, file → URL path, plus relative-path
//! and basename maps for fallback search. Lookups are lexical; the index
//! never stats the filesystem after the walk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::mapper::clean_path;

/// Page extensions the index strips when synthesizing URL paths.
const INDEX_FILES: &[&str] = &["index.html", "index.htm"];

#[derive(Debug)]
pub struct SiteIndex {
    root: PathBuf,
    site_root: String,
    convert_php: bool,

    /// Canonical mirror-relative page key → file. Keys have extensions and
    /// trailing `index.html` stripped: `ru/index.html` is keyed as `ru`,
    /// `ru/page.html` as `ru/page`, assets keep their full path.
    pages: HashMap<String, PathBuf>,

    /// File → synthesized site URL path (site root included).
    file_to_url: HashMap<PathBuf, String>,

    /// Exact mirror-relative path (forward slashes) → file.
    by_rel_path: HashMap<String, PathBuf>,

    /// Base name → file, first occurrence wins. Fallback of last resort.
    by_basename: HashMap<String, PathBuf>,
}

impl SiteIndex {
    /// Walk the mirror once and build all maps.
    pub fn build(root: &Path, site_root: &str, convert_php: bool) -> std::io::Result<Self> {
        let mut index = Self {
            root: root.to_path_buf(),
            site_root: normalize_site_root(site_root),
            convert_php,
            pages: HashMap::new(),
            file_to_url: HashMap::new(),
            by_rel_path: HashMap::new(),
            by_basename: HashMap::new(),
        };

        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable mirror entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            index.insert(entry.path());
        }

        tracing::info!(
            root = %root.display(),
            files = index.by_rel_path.len(),
            "site structure indexed"
        );
        Ok(index)
    }

    fn insert(&mut self, path: &Path) {
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => return,
        };

        self.by_rel_path.insert(rel.clone(), path.to_path_buf());
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.by_basename
                .entry(name.to_string())
                .or_insert_with(|| path.to_path_buf());
        }

        let key = self.page_key(&rel);
        self.file_to_url
            .insert(path.to_path_buf(), self.url_path_for_key(&key));
        self.pages.insert(key, path.to_path_buf());
    }

    /// Mirror-relative page key for a file: strip a trailing index file, a
    /// `.html`/`.htm` extension, and (when conversion is on) `.php`.
    fn page_key(&self, rel: &str) -> String {
        let lower = rel.to_ascii_lowercase();

        for index_file in INDEX_FILES {
            if lower == *index_file {
                return String::new();
            }
            if let Some(stripped) = strip_suffix_ci(rel, &lower, &format!("/{index_file}")) {
                return stripped;
            }
        }
        if let Some(stripped) = strip_suffix_ci(rel, &lower, ".html") {
            return stripped;
        }
        if let Some(stripped) = strip_suffix_ci(rel, &lower, ".htm") {
            return stripped;
        }
        if self.convert_php {
            if let Some(stripped) = strip_suffix_ci(rel, &lower, ".php") {
                return stripped;
            }
        }
        rel.to_string()
    }

    /// Site URL path for a page key: site root prepended, trailing slash
    /// elided except for the empty (root) path.
    fn url_path_for_key(&self, key: &str) -> String {
        if key.is_empty() {
            return self.site_root.clone();
        }
        let root = self.site_root.trim_end_matches('/');
        format!("{root}/{key}")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn site_root(&self) -> &str {
        &self.site_root
    }

    pub fn len(&self) -> usize {
        self.by_rel_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rel_path.is_empty()
    }

    /// Synthesized URL path for a file of the mirror.
    pub fn url_for_file(&self, path: &Path) -> Option<&str> {
        self.file_to_url.get(path).map(String::as_str)
    }

    /// Strip the configured site root from an absolute URL path, yielding a
    /// mirror-relative path.
    pub fn strip_site_root<'a>(&self, url_path: &'a str) -> &'a str {
        let trimmed = url_path.trim_start_matches('/');
        if self.site_root == "/" {
            return trimmed;
        }
        let root = self.site_root.trim_matches('/');
        if let Some(rest) = trimmed.strip_prefix(root) {
            return rest.trim_start_matches('/');
        }
        trimmed
    }

    /// Find the file a mirror-relative path refers to. Tries the canonical
    /// page key, extension variants, the exact relative path, and finally
    /// the basename map.
    pub fn find(&self, mirror_rel: &str) -> Option<&PathBuf> {
        let key = clean_path(mirror_rel);
        let lower = key.to_ascii_lowercase();

        if let Some(file) = self.pages.get(&key) {
            return Some(file);
        }

        for suffix in [".html", ".htm"] {
            if let Some(stripped) = strip_suffix_ci(&key, &lower, suffix) {
                if let Some(file) = self.pages.get(&stripped) {
                    return Some(file);
                }
            }
        }
        if self.convert_php {
            if let Some(stripped) = strip_suffix_ci(&key, &lower, ".php") {
                if let Some(file) = self.pages.get(&stripped) {
                    return Some(file);
                }
            }
        }
        for index_file in INDEX_FILES {
            if let Some(stripped) = strip_suffix_ci(&key, &lower, &format!("/{index_file}")) {
                if let Some(file) = self.pages.get(&stripped) {
                    return Some(file);
                }
            }
        }

        if let Some(file) = self.by_rel_path.get(&key) {
            return Some(file);
        }

        let basename = key.rsplit('/').next().unwrap_or(&key);
        if !basename.is_empty() {
            if let Some(file) = self.by_basename.get(basename) {
                return Some(file);
            }
        }

        None
    }
}

fn normalize_site_root(site_root: &str) -> String {
    let trimmed = site_root.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Case-insensitive suffix strip that preserves the original casing of the
/// remainder. `lower` must be the lowercase form of `value`.
fn strip_suffix_ci(value: &str, lower: &str, suffix: &str) -> Option<String> {
    if lower.ends_with(suffix) {
        Some(value[..value.len() - suffix.len()].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
    }

    fn sample_mirror() -> (TempDir, SiteIndex) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "index.html");
        touch(root, "ru/index.html");
        touch(root, "ru/chapters/1/index.html");
        touch(root, "ru/about.html");
        touch(root, "assets/css/style.css");
        touch(root, "js/app.js");
        touch(root, "legacy/app.php");

        let index = SiteIndex::build(root, "/", true).unwrap();
        (dir, index)
    }

    #[test]
    fn test_index_counts_all_files() {
        let (_dir, index) = sample_mirror();
        assert_eq!(index.len(), 7);
    }

    #[test]
    fn test_find_directory_pages() {
        let (dir, index) = sample_mirror();
        assert_eq!(
            index.find("ru").unwrap(),
            &dir.path().join("ru/index.html")
        );
        assert_eq!(
            index.find("ru/chapters/1").unwrap(),
            &dir.path().join("ru/chapters/1/index.html")
        );
        assert_eq!(index.find("").unwrap(), &dir.path().join("index.html"));
    }

    #[test]
    fn test_find_by_extension_variants() {
        let (dir, index) = sample_mirror();
        // Extension-bearing and stripped forms resolve to the same file.
        assert_eq!(
            index.find("ru/about.html").unwrap(),
            &dir.path().join("ru/about.html")
        );
        assert_eq!(
            index.find("ru/about").unwrap(),
            &dir.path().join("ru/about.html")
        );
        // Explicit index file names collapse to the directory page.
        assert_eq!(
            index.find("ru/index.html").unwrap(),
            &dir.path().join("ru/index.html")
        );
    }

    #[test]
    fn test_find_php_with_conversion() {
        let (dir, index) = sample_mirror();
        assert_eq!(
            index.find("legacy/app.php").unwrap(),
            &dir.path().join("legacy/app.php")
        );
        assert_eq!(
            index.find("legacy/app").unwrap(),
            &dir.path().join("legacy/app.php")
        );
    }

    #[test]
    fn test_find_assets_directly() {
        let (dir, index) = sample_mirror();
        assert_eq!(
            index.find("assets/css/style.css").unwrap(),
            &dir.path().join("assets/css/style.css")
        );
    }

    #[test]
    fn test_find_by_basename_fallback() {
        let (dir, index) = sample_mirror();
        assert_eq!(
            index.find("wrong/dir/style.css").unwrap(),
            &dir.path().join("assets/css/style.css")
        );
    }

    #[test]
    fn test_find_missing_returns_none() {
        let (_dir, index) = sample_mirror();
        assert!(index.find("no/such/page").is_none());
    }

    #[test]
    fn test_url_for_file_includes_site_root() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "ru/index.html");
        touch(dir.path(), "assets/a.css");
        let index = SiteIndex::build(dir.path(), "/docs/", false).unwrap();

        assert_eq!(
            index.url_for_file(&dir.path().join("ru/index.html")),
            Some("/docs/ru")
        );
        assert_eq!(
            index.url_for_file(&dir.path().join("assets/a.css")),
            Some("/docs/assets/a.css")
        );
    }

    #[test]
    fn test_strip_site_root() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "index.html");
        let index = SiteIndex::build(dir.path(), "/docs/", false).unwrap();

        assert_eq!(index.strip_site_root("/docs/ru/page"), "ru/page");
        assert_eq!(index.strip_site_root("/other/ru"), "other/ru");

        let root_index = SiteIndex::build(dir.path(), "/", false).unwrap();
        assert_eq!(root_index.strip_site_root("/ru/page"), "ru/page");
    }

    #[test]
    fn test_php_not_stripped_without_conversion() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "app.php");
        let index = SiteIndex::build(dir.path(), "/", false).unwrap();
        assert!(index.find("app.php").is_some());
        assert!(index.find("app").is_none());
    }
}
