//! Network-free second pass over a completed mirror.
//!
//! Walks the mirror once to index it, then rewrites HTML/CSS/JS links
//! against the walked layout: same-host URLs become relative paths to the
//! actual files on disk, external links are kept or blanked, stale meta
//! tags are dropped, and optionally matching `<script>` elements are
//! replaced with a comment and `.php` pages become `.html`.

use dashmap::DashMap;
use lol_html::html_content::ContentType;
use lol_html::{element, HtmlRewriter, Settings};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;
use walkdir::WalkDir;

use crate::mapper::clean_path;
use crate::site_index::SiteIndex;

/// Attributes that carry URLs and are rewritten on every element.
/// `content` is special-cased: only meta elements get it rewritten.
const LINK_ATTRS: &[&str] = &[
    "href",
    "src",
    "action",
    "data-src",
    "data-href",
    "poster",
    "cite",
    "formaction",
    "icon",
    "manifest",
    "archive",
    "codebase",
    "data",
    "usemap",
    "background",
];

/// Directories rooted at the mirror top that are reached with a plain
/// `../ × n` walk instead of the generic relative computation.
const ROOT_RESOURCE_DIRS: &[&str] = &[
    "assets", "css", "js", "images", "img", "fonts", "static", "media",
];

/// Schemes and pseudo-URLs the rewriter never touches.
const SPECIAL_PREFIXES: &[&str] = &[
    "mailto:", "tel:", "javascript:", "data:", "file:", "ftp:", "ssh:", "irc:", "magnet:",
    "blob:", "about:", "chrome:", "edge:",
];

const FILE_QUEUE_CAPACITY: usize = 10_000;

const SCRIPT_REMOVED_COMMENT: &str = "<!-- [sitemirror] script removed -->";

const HTML_MARKERS: &[&str] = &[
    "<!doctype", "<html", "<head", "<body", "<div", "<p", "<h1", "<h2", "<h3", "<script",
    "<style",
];

#[derive(Debug, Error)]
pub enum PostError {
    #[error("input directory does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct PostConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub original_host: String,
    pub site_root: String,
    pub workers: usize,
    pub keep_external: bool,
    pub remove_missing: bool,
    pub convert_php: bool,
    pub verbose: bool,
    pub scripts_to_remove: Vec<String>,
}

impl PostConfig {
    pub fn new(input_dir: impl Into<PathBuf>, original_host: impl Into<String>) -> Self {
        let input_dir = input_dir.into();
        Self {
            output_dir: input_dir.clone(),
            input_dir,
            original_host: original_host.into(),
            site_root: "/".to_string(),
            workers: num_cpus::get() * 2,
            keep_external: false,
            remove_missing: false,
            convert_php: true,
            verbose: false,
            scripts_to_remove: Vec::new(),
        }
    }
}

/// Accumulated processing statistics, updated atomically by workers.
#[derive(Debug, Default)]
pub struct PostStats {
    pub total_files: AtomicI64,
    pub processed: AtomicI64,
    pub modified: AtomicI64,
    pub failed: AtomicI64,
    pub links_rewritten: AtomicI64,
    pub external_links: AtomicI64,
}

/// Final report returned by `PostProcessor::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReport {
    pub total_files: i64,
    pub processed: i64,
    pub modified: i64,
    pub failed: i64,
    pub links_rewritten: i64,
    pub external_links: i64,
    pub duration: Duration,
}

impl std::fmt::Display for PostReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", "═".repeat(50))?;
        writeln!(f, "Post-processing summary")?;
        writeln!(f, "├─ Total files:     {}", self.total_files)?;
        writeln!(f, "├─ Processed:       {}", self.processed)?;
        writeln!(f, "├─ Modified:        {}", self.modified)?;
        writeln!(f, "├─ Failed:          {}", self.failed)?;
        writeln!(f, "├─ Links rewritten: {}", self.links_rewritten)?;
        writeln!(f, "├─ External links:  {}", self.external_links)?;
        writeln!(f, "└─ Duration:        {:.2?}", self.duration)?;
        write!(f, "{}", "═".repeat(50))
    }
}

pub struct PostProcessor {
    config: PostConfig,
    index: SiteIndex,
    pub stats: PostStats,
    /// Output paths currently being written; keeps two workers off one file.
    in_progress: DashMap<PathBuf, ()>,
}

impl PostProcessor {
    /// Validate the input directory and build the site index.
    pub fn new(config: PostConfig) -> Result<Arc<Self>, PostError> {
        if !config.input_dir.is_dir() {
            return Err(PostError::MissingInput(config.input_dir.clone()));
        }
        let index = SiteIndex::build(&config.input_dir, &config.site_root, config.convert_php)?;
        Ok(Arc::new(Self {
            config,
            index,
            stats: PostStats::default(),
            in_progress: DashMap::new(),
        }))
    }

    /// Process the whole mirror and return the accumulated statistics.
    pub async fn run(self: &Arc<Self>) -> Result<PostReport, PostError> {
        let started = Instant::now();
        tracing::info!(
            input = %self.config.input_dir.display(),
            output = %self.config.output_dir.display(),
            host = %self.config.original_host,
            root = %self.config.site_root,
            workers = self.config.workers,
            "starting post-processor"
        );

        if self.config.output_dir != self.config.input_dir {
            tokio::fs::create_dir_all(&self.config.output_dir).await?;
        }

        let (tx, rx) = mpsc::channel::<PathBuf>(FILE_QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let collector = {
            let me = self.clone();
            tokio::task::spawn_blocking(move || {
                for entry in WalkDir::new(&me.config.input_dir) {
                    let Ok(entry) = entry else { continue };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if is_processable(entry.path()) {
                        me.stats.total_files.fetch_add(1, Ordering::Relaxed);
                    }
                    if tx.blocking_send(entry.path().to_path_buf()).is_err() {
                        break;
                    }
                }
            })
        };

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            let me = self.clone();
            let rx = rx.clone();
            workers.spawn(async move {
                loop {
                    let path = { rx.lock().await.recv().await };
                    let Some(path) = path else { break };
                    me.process_file(&path).await;
                }
            });
        }

        let _ = collector.await;
        while workers.join_next().await.is_some() {}

        let report = self.report(started.elapsed());
        tracing::info!(
            processed = report.processed,
            links = report.links_rewritten,
            "post-processing done"
        );
        Ok(report)
    }

    fn report(&self, duration: Duration) -> PostReport {
        PostReport {
            total_files: self.stats.total_files.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            modified: self.stats.modified.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            links_rewritten: self.stats.links_rewritten.load(Ordering::Relaxed),
            external_links: self.stats.external_links.load(Ordering::Relaxed),
            duration,
        }
    }

    async fn process_file(&self, path: &Path) {
        if self.in_progress.insert(path.to_path_buf(), ()).is_some() {
            return;
        }

        let result = self.process_file_inner(path).await;
        self.in_progress.remove(path);

        match result {
            Ok(true) => {
                self.stats.modified.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %path.display(), error = %e, "processing failed");
            }
        }
    }

    async fn process_file_inner(&self, path: &Path) -> Result<bool, PostError> {
        let rel = path
            .strip_prefix(&self.config.input_dir)
            .unwrap_or(path)
            .to_path_buf();
        let mut output = self.config.output_dir.join(&rel);

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let convert = ext == "php" && self.config.convert_php;
        if convert {
            output.set_extension("html");
        }

        if is_processable(path) {
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let modified = match ext.as_str() {
            "html" | "htm" | "xhtml" => self.process_html_file(path, &output).await?,
            "php" if convert => {
                let (modified, converted) = self.convert_php_file(path, &output).await?;
                if converted && self.config.output_dir == self.config.input_dir {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        tracing::warn!(path = %path.display(), error = %e, "cannot remove converted php source");
                    }
                }
                modified
            }
            "php" => self.process_html_file(path, &output).await?,
            "css" | "scss" | "less" => self.process_css_file(path, &output).await?,
            "js" => self.process_js_file(path, &output).await?,
            _ => {
                if path != output {
                    tokio::fs::copy(path, &output).await?;
                }
                false
            }
        };

        if modified && self.config.verbose {
            tracing::info!(from = %path.display(), to = %output.display(), "rewritten");
        }
        Ok(modified)
    }

    // ---------- HTML ----------

    async fn process_html_file(&self, path: &Path, output: &Path) -> Result<bool, PostError> {
        let content = tokio::fs::read(path).await?;

        let rewritten = match self.rewrite_html(&content, path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "HTML parse failed, using fallback");
                return self.fallback_html(&content, path, output).await;
            }
        };

        let rewritten = if self.config.convert_php {
            update_php_links(&String::from_utf8_lossy(&rewritten)).into_bytes()
        } else {
            rewritten
        };

        let modified = rewritten != content;
        if modified {
            tokio::fs::write(output, &rewritten).await?;
        } else if path != output {
            tokio::fs::write(output, &content).await?;
        }
        Ok(modified)
    }

    fn rewrite_html(&self, content: &[u8], current_file: &Path) -> Result<Vec<u8>, String> {
        let mut output = Vec::with_capacity(content.len());
        let host = self.config.original_host.clone();

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    // Optional script stripping: matching scripts become a
                    // single comment node.
                    element!("script", |el| {
                        if self.config.scripts_to_remove.is_empty() {
                            return Ok(());
                        }
                        let src = el.get_attribute("src");
                        let matched = self.config.scripts_to_remove.iter().any(|p| match &src {
                            Some(s) => s.contains(p.as_str()),
                            None => p == "inline",
                        });
                        if matched {
                            el.replace(SCRIPT_REMOVED_COMMENT, ContentType::Html);
                        }
                        Ok(())
                    }),
                    // Stale meta tags: refresh redirects and Open-Graph tags
                    // still pointing at the live site.
                    element!("meta", |el| {
                        if el
                            .get_attribute("http-equiv")
                            .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
                        {
                            el.remove();
                            return Ok(());
                        }
                        let property = el.get_attribute("property").unwrap_or_default();
                        if property.starts_with("og:") {
                            if el
                                .get_attribute("content")
                                .is_some_and(|c| c.contains(&host))
                            {
                                el.remove();
                                return Ok(());
                            }
                        }
                        // `content` is part of the link-bearing attribute
                        // set on meta elements; non-URL values pass through
                        // the resolver unchanged.
                        if let Some(value) = el.get_attribute("content") {
                            let rewritten = self.process_url(&value, current_file);
                            if rewritten != value {
                                el.set_attribute("content", &rewritten)?;
                                self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(())
                    }),
                    // Canonical links and links still referencing the live
                    // host are dropped.
                    element!("link", |el| {
                        if el
                            .get_attribute("rel")
                            .is_some_and(|v| v.eq_ignore_ascii_case("canonical"))
                        {
                            el.remove();
                            return Ok(());
                        }
                        if el.get_attribute("href").is_some_and(|h| h.contains(&host)) {
                            el.remove();
                        }
                        Ok(())
                    }),
                    element!("*", |el| {
                        if el.removed() {
                            return Ok(());
                        }
                        for attr in LINK_ATTRS {
                            let Some(value) = el.get_attribute(attr) else {
                                continue;
                            };
                            let rewritten = self.process_url(&value, current_file);
                            if rewritten != value {
                                el.set_attribute(attr, &rewritten)?;
                                self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        if let Some(srcset) = el.get_attribute("srcset") {
                            let rewritten = self.process_srcset(&srcset, current_file);
                            if rewritten != srcset {
                                el.set_attribute("srcset", &rewritten)?;
                                self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );

        rewriter.write(content).map_err(|e| e.to_string())?;
        rewriter.end().map_err(|e| e.to_string())?;
        Ok(output)
    }

    /// `srcset` holds comma-separated URL/descriptor pairs; each URL is
    /// rewritten individually with its descriptor preserved.
    fn process_srcset(&self, srcset: &str, current_file: &Path) -> String {
        let mut parts = Vec::new();
        for part in srcset.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut fields = part.split_whitespace();
            let Some(url) = fields.next() else { continue };
            let rewritten = self.process_url(url, current_file);
            match fields.next() {
                Some(descriptor) => parts.push(format!("{rewritten} {descriptor}")),
                None => parts.push(rewritten),
            }
        }
        parts.join(", ")
    }

    /// Regex fallback when the HTML rewriter fails: strip the original
    /// host's absolute prefixes and resolve the remaining paths.
    async fn fallback_html(
        &self,
        content: &[u8],
        path: &Path,
        output: &Path,
    ) -> Result<bool, PostError> {
        let text = String::from_utf8_lossy(content);
        let host = regex::escape(&self.config.original_host);
        let mut result = text.to_string();

        for prefix in [format!(r"https?://{host}"), format!(r"//{host}")] {
            let Ok(re) = Regex::new(&format!(r#"{prefix}([^'"\s>]*)"#)) else {
                continue;
            };
            result = re
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let url_path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                    let url_path = if url_path.is_empty() { "/" } else { url_path };
                    self.process_url(url_path, path)
                })
                .to_string();
        }

        if self.config.convert_php {
            result = update_php_links(&result);
        }

        let modified = result.as_bytes() != content;
        if modified {
            tokio::fs::write(output, result.as_bytes()).await?;
        } else if path != output {
            tokio::fs::write(output, content).await?;
        }
        Ok(modified)
    }

    async fn convert_php_file(&self, path: &Path, output: &Path) -> Result<(bool, bool), PostError> {
        let content = tokio::fs::read(path).await?;
        let sample = String::from_utf8_lossy(&content).to_ascii_lowercase();

        if !HTML_MARKERS.iter().any(|m| sample.contains(m)) {
            // Not an HTML-bearing page; keep the .php file verbatim.
            let verbatim = output.with_extension("php");
            if path != verbatim {
                tokio::fs::copy(path, &verbatim).await?;
            }
            return Ok((false, false));
        }

        let modified = self.process_html_file(path, output).await?;
        Ok((modified, true))
    }

    // ---------- CSS ----------

    async fn process_css_file(&self, path: &Path, output: &Path) -> Result<bool, PostError> {
        let content = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&content);
        let rewritten = self.rewrite_css(&text, path);

        let modified = rewritten.as_bytes() != content;
        if modified {
            tokio::fs::write(output, rewritten.as_bytes()).await?;
        } else if path != output {
            tokio::fs::write(output, &content).await?;
        }
        Ok(modified)
    }

    /// Rewrite every `url(...)` and `@import` target. Plain text regexes,
    /// no AST.
    fn rewrite_css(&self, content: &str, current_file: &Path) -> String {
        let result = css_url_regex()
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let url = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().trim())
                    .unwrap_or("");
                if url.is_empty() {
                    return caps[0].to_string();
                }
                let rewritten = self.process_url(url, current_file);
                if rewritten != url {
                    self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                }
                caps[0].replacen(url, &rewritten, 1)
            })
            .to_string();

        css_import_regex()
            .replace_all(&result, |caps: &regex::Captures<'_>| {
                let url = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if url.is_empty() {
                    return caps[0].to_string();
                }
                let rewritten = self.process_url(url, current_file);
                if rewritten != url {
                    self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                }
                caps[0].replacen(url, &rewritten, 1)
            })
            .to_string()
    }

    // ---------- JS ----------

    async fn process_js_file(&self, path: &Path, output: &Path) -> Result<bool, PostError> {
        let content = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&content);
        let rewritten = self.rewrite_js(&text, path);

        let modified = rewritten.as_bytes() != content;
        if modified {
            tokio::fs::write(output, rewritten.as_bytes()).await?;
        } else if path != output {
            tokio::fs::write(output, &content).await?;
        }
        Ok(modified)
    }

    /// Only string literals containing the original host are rewritten.
    fn rewrite_js(&self, content: &str, current_file: &Path) -> String {
        js_url_regex()
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let url = &caps[1];
                if !url.contains(&self.config.original_host) {
                    return caps[0].to_string();
                }
                let rewritten = self.process_url(url, current_file);
                if rewritten != url {
                    self.stats.links_rewritten.fetch_add(1, Ordering::Relaxed);
                }
                caps[0].replacen(url, &rewritten, 1)
            })
            .to_string()
    }

    // ---------- link resolution ----------

    /// Turn one URL into a relative path usable from the current file.
    ///
    /// Special protocols pass through; same-host URLs resolve through the
    /// site index; external hosts are kept or blanked per configuration;
    /// missing targets keep the original unless `remove_missing`.
    pub fn process_url(&self, original: &str, current_file: &Path) -> String {
        if original.is_empty() || original == "#" {
            return original.to_string();
        }
        if original.starts_with('#') {
            return original.to_string();
        }
        if SPECIAL_PREFIXES.iter().any(|p| original.starts_with(p)) {
            return original.to_string();
        }

        if original.starts_with("http://") || original.starts_with("https://") {
            return self.process_absolute(original, original, current_file);
        }
        if let Some(_rest) = original.strip_prefix("//") {
            return self.process_absolute(&format!("https:{original}"), original, current_file);
        }

        self.resolve_path(original, original, current_file)
    }

    fn process_absolute(&self, absolute: &str, original: &str, current_file: &Path) -> String {
        let Ok(parsed) = Url::parse(absolute) else {
            return original.to_string();
        };

        if !self.matches_host(parsed.host_str().unwrap_or_default()) {
            self.stats.external_links.fetch_add(1, Ordering::Relaxed);
            if self.config.keep_external {
                return original.to_string();
            }
            return "#".to_string();
        }

        let mut path_qf = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path_qf.push('?');
            path_qf.push_str(query);
        }
        if let Some(fragment) = parsed.fragment() {
            path_qf.push('#');
            path_qf.push_str(fragment);
        }
        self.resolve_path(&path_qf, original, current_file)
    }

    fn matches_host(&self, host: &str) -> bool {
        if self.config.original_host.is_empty() {
            return false;
        }
        let clean = host.trim_start_matches("www.");
        let original = self.config.original_host.trim_start_matches("www.");
        clean == original || host == self.config.original_host
    }

    fn resolve_path(&self, path_qf: &str, original: &str, current_file: &Path) -> String {
        let (path, suffix) = split_query_fragment(path_qf);
        if path.is_empty() {
            return original.to_string();
        }

        // Root-relative paths lose the site root; document-relative paths
        // are resolved against the current file's directory in the mirror.
        let mirror_rel = if path.starts_with('/') {
            self.index.strip_site_root(path).to_string()
        } else {
            let current_dir = current_file
                .parent()
                .and_then(|d| d.strip_prefix(self.index.root()).ok())
                .map(|d| d.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            clean_path(&format!("{current_dir}/{path}"))
        };

        let Some(target) = self.index.find(&mirror_rel) else {
            return self.handle_missing(original, suffix);
        };

        let relative = self.relative_to(target, current_file);
        format!("{relative}{suffix}")
    }

    fn handle_missing(&self, original: &str, suffix: &str) -> String {
        if self.config.remove_missing {
            if suffix.starts_with('#') {
                return suffix.to_string();
            }
            return "#".to_string();
        }
        original.to_string()
    }

    /// Relative path from the current file's directory to the target file.
    fn relative_to(&self, target: &Path, current_file: &Path) -> String {
        let target_rel = target
            .strip_prefix(self.index.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| target.to_string_lossy().replace('\\', "/"));
        let current_dir = current_file.parent().unwrap_or_else(|| Path::new(""));
        let current_rel = current_dir
            .strip_prefix(self.index.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        // Resources in well-known top-level directories take the short
        // `../ × n` walk to the mirror root.
        if let Some(first) = target_rel.split('/').next() {
            if target_rel.contains('/') && ROOT_RESOURCE_DIRS.contains(&first) {
                let levels = if current_rel.is_empty() {
                    0
                } else {
                    current_rel.split('/').count()
                };
                return format!("{}{target_rel}", "../".repeat(levels));
            }
        }

        let Some(diff) = pathdiff::diff_paths(target, current_dir) else {
            return format!("./{target_rel}");
        };
        let relative = diff.to_string_lossy().replace('\\', "/");
        if relative.starts_with("../") || relative.starts_with("./") {
            relative
        } else {
            format!("./{relative}")
        }
    }
}

fn is_processable(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    matches!(
        ext.as_str(),
        "html" | "htm" | "xhtml" | "php" | "css" | "scss" | "less" | "js"
    )
}

/// Split a path into `(path, query-and-fragment suffix)`.
fn split_query_fragment(path: &str) -> (&str, &str) {
    if let Some(idx) = path.find(['?', '#']) {
        (&path[..idx], &path[idx..])
    } else {
        (path, "")
    }
}

/// Replace leftover `.php` references with `.html` in attribute values and
/// CSS urls.
fn update_php_links(content: &str) -> String {
    let attr_re = php_attr_regex();
    let css_re = php_css_regex();

    let result = attr_re
        .replace_all(content, |caps: &regex::Captures<'_>| {
            caps[0].replacen(".php", ".html", 1)
        })
        .to_string();
    css_re
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            caps[0].replacen(".php", ".html", 1)
        })
        .to_string()
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:'([^']*)'|"([^"]*)"|([^'"\)\s]+))\s*\)"#)
            .expect("Invalid CSS url regex")
    })
}

fn css_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s*(?:url\()?\s*['"]([^'"]+?)['"]\s*\)?\s*;"#)
            .expect("Invalid CSS import regex")
    })
}

fn js_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"](https?://[^'"]*?)['"]"#).expect("Invalid JS url regex")
    })
}

fn php_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(href|src|action)\s*=\s*['"]([^'"]*?)\.php(\?[^'"]*?)?['"]"#)
            .expect("Invalid php attr regex")
    })
}

fn php_css_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\s*\(\s*['"]?([^)'"]*?)\.php(\?[^'"]*?)?['"]?\s*\)"#)
            .expect("Invalid php css regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
    }

    fn sample_processor(dir: &TempDir) -> Arc<PostProcessor> {
        let root = dir.path();
        write(root, "index.html", "<html><body>root</body></html>");
        write(root, "ru/index.html", "<html><body>ru</body></html>");
        write(
            root,
            "ru/chapters/1/index.html",
            "<html><body>ch1</body></html>",
        );
        write(root, "ru/about.html", "<html><body>about</body></html>");
        write(root, "assets/css/style.css", "body{}");
        write(root, "img/logo.png", "png");

        let config = PostConfig::new(root, "ex.com");
        PostProcessor::new(config).unwrap()
    }

    fn current(dir: &TempDir, rel: &str) -> PathBuf {
        dir.path().join(rel)
    }

    #[test]
    fn test_same_host_absolute_url() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/chapters/1/index.html");
        let rewritten = p.process_url("https://ex.com/ru/about.html", &from);
        assert_eq!(rewritten, "../../about.html");
    }

    #[test]
    fn test_external_host_blanked_by_default() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "index.html");
        assert_eq!(p.process_url("https://other.com/x", &from), "#");
        assert_eq!(p.stats.external_links.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_external_host_kept_with_flag() {
        let dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(dir.path(), "ex.com");
        config.keep_external = true;
        write(dir.path(), "index.html", "<html></html>");
        let p = PostProcessor::new(config).unwrap();
        let from = current(&dir, "index.html");
        assert_eq!(
            p.process_url("https://other.com/x", &from),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_root_resource_dir_short_circuit() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/chapters/1/index.html");
        assert_eq!(
            p.process_url("/assets/css/style.css", &from),
            "../../../assets/css/style.css"
        );
    }

    #[test]
    fn test_missing_target_preserved_by_default() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "index.html");
        assert_eq!(p.process_url("/no/such/page", &from), "/no/such/page");
    }

    #[test]
    fn test_missing_target_blanked_with_remove_missing() {
        let dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(dir.path(), "ex.com");
        config.remove_missing = true;
        write(dir.path(), "index.html", "<html></html>");
        let p = PostProcessor::new(config).unwrap();
        let from = current(&dir, "index.html");
        assert_eq!(p.process_url("/no/such/page", &from), "#");
        assert_eq!(p.process_url("/no/such/page#frag", &from), "#frag");
    }

    #[test]
    fn test_query_and_fragment_preserved() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/chapters/1/index.html");
        assert_eq!(
            p.process_url("/ru/about.html?x=1#top", &from),
            "../../about.html?x=1#top"
        );
    }

    #[test]
    fn test_special_protocols_unchanged() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "index.html");
        for link in ["mailto:a@b.c", "tel:+1", "javascript:x()", "data:,x", "#a"] {
            assert_eq!(p.process_url(link, &from), link);
        }
    }

    #[test]
    fn test_protocol_relative_same_host() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        assert_eq!(p.process_url("//ex.com/ru/about.html", &from), "./about.html");
    }

    #[test]
    fn test_www_prefix_matches_host() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        assert_eq!(
            p.process_url("https://www.ex.com/ru/about.html", &from),
            "./about.html"
        );
    }

    #[test]
    fn test_document_relative_link() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        assert_eq!(p.process_url("about.html", &from), "./about.html");
        assert_eq!(p.process_url("chapters/1/", &from), "./chapters/1/index.html");
    }

    #[test]
    fn test_srcset_rewrites_each_url() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        let srcset = "/img/logo.png 1x, https://other.com/big.png 2x";
        assert_eq!(
            p.process_srcset(srcset, &from),
            "../img/logo.png 1x, # 2x"
        );
    }

    #[test]
    fn test_rewrite_css_urls_and_imports() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        let css = r#"@import url('/assets/css/style.css');
            .a { background: url(/img/logo.png); }"#;
        let out = p.rewrite_css(css, &from);
        assert!(out.contains("url(../img/logo.png)"), "got: {out}");
        assert!(out.contains("../assets/css/style.css"), "got: {out}");
    }

    #[test]
    fn test_rewrite_js_only_host_literals() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "index.html");
        let js = r#"const a = "https://ex.com/ru/about.html"; const b = "https://cdn.other.com/x";"#;
        let out = p.rewrite_js(js, &from);
        assert!(out.contains(r#""./ru/about.html""#), "got: {out}");
        assert!(out.contains("https://cdn.other.com/x"), "got: {out}");
    }

    #[test]
    fn test_update_php_links() {
        let html = r#"<a href="page.php">x</a> <form action='do.php?a=1'>"#;
        let out = update_php_links(html);
        assert!(out.contains(r#"href="page.html""#), "got: {out}");
        assert!(out.contains("do.html?a=1"), "got: {out}");
    }

    #[test]
    fn test_rewrite_html_attributes_and_meta_cleanup() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        let html = br#"<html><head>
            <meta http-equiv="refresh" content="0; url=https://ex.com/">
            <meta property="og:url" content="https://ex.com/ru/">
            <link rel="canonical" href="https://ex.com/ru/">
            <link rel="stylesheet" href="/assets/css/style.css">
        </head><body>
            <a href="/ru/about.html">about</a>
        </body></html>"#;
        let out = p.rewrite_html(html, &from).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(!out.contains("http-equiv"), "got: {out}");
        assert!(!out.contains("og:url"), "got: {out}");
        assert!(!out.contains("canonical"), "got: {out}");
        assert!(out.contains(r#"href="./about.html""#), "got: {out}");
        // The stylesheet link does not mention the host, so it survives and
        // is rewritten.
        assert!(out.contains("../assets/css/style.css"), "got: {out}");
    }

    #[test]
    fn test_meta_content_rewritten_unconditionally() {
        let dir = TempDir::new().unwrap();
        let p = sample_processor(&dir);
        let from = current(&dir, "ru/index.html");
        let html = br#"<html><head>
            <meta itemprop="url" content="/ru/about.html">
            <meta name="thumbnail" content="/img/logo.png">
            <meta name="description" content="plain prose stays put">
        </head></html>"#;
        let out = p.rewrite_html(html, &from).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(r#"content="./about.html""#), "got: {out}");
        assert!(out.contains(r#"content="../img/logo.png""#), "got: {out}");
        assert!(out.contains("plain prose stays put"), "got: {out}");
    }

    #[test]
    fn test_script_removal_by_pattern() {
        let dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(dir.path(), "ex.com");
        config.scripts_to_remove = vec!["analytics".to_string()];
        write(dir.path(), "index.html", "<html></html>");
        let p = PostProcessor::new(config).unwrap();
        let from = current(&dir, "index.html");

        let html = br#"<script src="/js/analytics.js"></script><script src="/js/app.js"></script>"#;
        let out = p.rewrite_html(html, &from).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(SCRIPT_REMOVED_COMMENT), "got: {out}");
        assert!(!out.contains("analytics.js"), "got: {out}");
        assert!(out.contains("app.js"), "got: {out}");
    }

    #[test]
    fn test_inline_script_removal() {
        let dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(dir.path(), "ex.com");
        config.scripts_to_remove = vec!["inline".to_string()];
        write(dir.path(), "index.html", "<html></html>");
        let p = PostProcessor::new(config).unwrap();
        let from = current(&dir, "index.html");

        let html = br#"<script>track()</script><script src="/js/app.js"></script>"#;
        let out = p.rewrite_html(html, &from).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(!out.contains("track()"), "got: {out}");
        assert!(out.contains("app.js"), "got: {out}");
    }

    #[tokio::test]
    async fn test_run_processes_whole_mirror() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "index.html",
            r#"<html><body><a href="https://ex.com/ru/">ru</a></body></html>"#,
        );
        write(root, "ru/index.html", "<html><body>ru</body></html>");
        write(
            root,
            "assets/css/style.css",
            ".a{background:url(https://ex.com/img/logo.png)}",
        );
        write(root, "img/logo.png", "png");

        let out_dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(root, "ex.com");
        config.output_dir = out_dir.path().to_path_buf();
        config.workers = 2;
        let p = PostProcessor::new(config).unwrap();
        let report = p.run().await.unwrap();

        assert_eq!(report.failed, 0);
        assert!(report.links_rewritten >= 2);
        // Non-processable files are copied when the output differs.
        assert!(out_dir.path().join("img/logo.png").exists());

        let index = std::fs::read_to_string(out_dir.path().join("index.html")).unwrap();
        assert!(index.contains(r#"href="./ru/index.html""#), "got: {index}");

        let css = std::fs::read_to_string(out_dir.path().join("assets/css/style.css")).unwrap();
        assert!(css.contains("../img/logo.png"), "got: {css}");
    }

    #[tokio::test]
    async fn test_php_conversion_to_separate_output() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "page.php",
            r#"<html><body><a href="other.php">x</a></body></html>"#,
        );
        write(root, "other.php", "<html><body>other</body></html>");

        let out_dir = TempDir::new().unwrap();
        let mut config = PostConfig::new(root, "ex.com");
        config.output_dir = out_dir.path().to_path_buf();
        config.workers = 1;
        let p = PostProcessor::new(config).unwrap();
        p.run().await.unwrap();

        assert!(out_dir.path().join("page.html").exists());
        assert!(out_dir.path().join("other.html").exists());
        // Sources are kept when the output directory differs.
        assert!(root.join("page.php").exists());

        let page = std::fs::read_to_string(out_dir.path().join("page.html")).unwrap();
        assert!(page.contains("other"), "got: {page}");
        assert!(!page.contains(".php"), "got: {page}");
    }

    #[test]
    fn test_split_query_fragment() {
        assert_eq!(split_query_fragment("/a/b?x=1#f"), ("/a/b", "?x=1#f"));
        assert_eq!(split_query_fragment("/a/b#f"), ("/a/b", "#f"));
        assert_eq!(split_query_fragment("/a/b"), ("/a/b", ""));
    }
}
