//! In-crawl link rewriting.
//!
//! `rewrite_link` turns a same-host URL into a relative path that resolves
//! from the containing page's location on disk. The relative link is computed
//! between *filesystem* paths, not URL paths: directory-index pages and
//! php→html rewrites make the two maps differ, and both ends must use the
//! same mapping or the saved mirror breaks.
//!
//! `ContentHandler` is the bounded set of byte transformations a worker runs
//! over fetched content before it is written to disk, in stable
//! priority-ascending order.

use lol_html::{element, HtmlRewriter, Settings};
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::mapper;
use crate::models::FileMetadata;
use crate::url_utils;

/// HTML attributes rewritten during the crawl.
const CRAWL_LINK_ATTRS: &[&str] = &["href", "src", "action"];

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("HTML rewriting error: {0}")]
    Html(String),

    #[error("invalid document URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Rewrite one outbound URL relative to the page that contains it.
///
/// External links, special schemes, and unparseable input pass through
/// unchanged. The query and fragment of the original link are preserved.
/// Purely functional; never consults the filesystem.
pub fn rewrite_link(original: &str, base: &Url) -> String {
    let original = original.trim();
    if original.is_empty() || url_utils::is_special_link(original) {
        return original.to_string();
    }

    let Ok(target) = base.join(original) else {
        return original.to_string();
    };

    if !matches!(target.scheme(), "http" | "https") {
        return original.to_string();
    }
    if target.host_str() != base.host_str() {
        return original.to_string();
    }

    // Both endpoints mapped to their on-disk locations (host omitted).
    let base_disk = mapper::disk_relpath_inferred(base.path());
    let target_disk = mapper::disk_relpath_inferred(target.path());

    let base_dir = Path::new(&base_disk).parent().unwrap_or(Path::new(""));
    let Some(diff) = pathdiff::diff_paths(Path::new(&target_disk), base_dir) else {
        return original.to_string();
    };

    let mut relative = diff.to_string_lossy().replace('\\', "/");
    if relative == "index.html" {
        relative = "./".to_string();
    } else if relative.ends_with("/index.html") {
        relative.truncate(relative.len() - "index.html".len());
    }
    if relative.is_empty() {
        relative = "./".to_string();
    }

    if let Some(query) = target.query() {
        relative.push('?');
        relative.push_str(query);
    }
    if let Some(fragment) = target.fragment() {
        relative.push('#');
        relative.push_str(fragment);
    }

    relative
}

/// Rewrites same-host links inside HTML documents so the saved bytes are
/// browsable straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkRewriter;

impl LinkRewriter {
    fn rewrite_html(&self, content: &[u8], meta: &FileMetadata) -> Result<Vec<u8>, RewriteError> {
        let base = Url::parse(&meta.url)?;
        let mut output = Vec::with_capacity(content.len());

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![element!("*", |el| {
                    for attr in CRAWL_LINK_ATTRS {
                        let Some(value) = el.get_attribute(attr) else {
                            continue;
                        };
                        if value.is_empty() || value.starts_with("file://") {
                            continue;
                        }
                        let rewritten = rewrite_link(&value, &base);
                        if rewritten != value {
                            el.set_attribute(attr, &rewritten)?;
                        }
                    }
                    Ok(())
                })],
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );

        rewriter
            .write(content)
            .map_err(|e| RewriteError::Html(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Html(e.to_string()))?;

        Ok(output)
    }
}

/// Content handlers form a small bounded set dispatched by variant; each
/// receives the current bytes plus metadata and returns possibly-modified
/// bytes.
#[derive(Debug, Clone, Copy)]
pub enum ContentHandler {
    LinkRewriter(LinkRewriter),
}

impl ContentHandler {
    pub fn priority(&self) -> i32 {
        match self {
            ContentHandler::LinkRewriter(_) => 10,
        }
    }

    pub fn handle(&self, content: &[u8], meta: &FileMetadata) -> Result<Vec<u8>, RewriteError> {
        match self {
            ContentHandler::LinkRewriter(rewriter) => {
                if !meta.content_type.contains("text/html") {
                    return Ok(content.to_vec());
                }
                rewriter.rewrite_html(content, meta)
            }
        }
    }
}

/// The default pipeline: the link rewriter at priority 10.
pub fn default_handlers() -> Vec<ContentHandler> {
    let mut handlers = vec![ContentHandler::LinkRewriter(LinkRewriter)];
    handlers.sort_by_key(|h| h.priority());
    handlers
}
