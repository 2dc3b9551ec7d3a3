//! Scope decision for candidate URLs.
//!
//! A URL is worth downloading when it lives on the configured host and either
//! sits inside the base path or names a whitelisted static asset. Assets are
//! accepted from anywhere on the host so stylesheets and images referenced
//! from outside the base path still land in the mirror.

use url::Url;

use crate::url_utils;

/// Static-asset extensions accepted regardless of the base path.
pub const ASSET_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".json", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico",
    ".webp", ".avif", ".woff", ".woff2", ".ttf", ".eot", ".otf", ".mp4", ".webm", ".mp3", ".wav",
    ".ogg", ".avi", ".mov", ".pdf",
];

#[derive(Debug, Clone)]
pub struct UrlFilter {
    domain: String,
    base_path: String,
}

impl UrlFilter {
    pub fn new(domain: impl Into<String>, base_path: impl Into<String>) -> Self {
        let mut base_path = base_path.into();
        if base_path.is_empty() {
            base_path.push('/');
        }
        Self {
            domain: domain.into(),
            base_path,
        }
    }

    /// Build a filter scoped to the host and path of the job's root URL.
    pub fn from_root(root: &Url) -> Self {
        Self::new(root.host_str().unwrap_or_default(), root.path())
    }

    /// Decide whether the URL is in scope for download.
    pub fn should_download(&self, raw: &str) -> bool {
        if url_utils::is_special_link(raw) {
            return false;
        }

        // Pin protocol-relative URLs to https before judging them.
        let owned;
        let candidate = if let Some(rest) = raw.strip_prefix("//") {
            owned = format!("https://{}", rest);
            &owned
        } else {
            raw
        };

        let parsed = match Url::parse(candidate) {
            Ok(u) => u,
            Err(_) => return false,
        };

        if parsed.host_str() != Some(self.domain.as_str()) {
            return false;
        }

        let path = parsed.path().to_ascii_lowercase();
        if ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return true;
        }

        // Page candidates must stay inside the base path.
        parsed.path().starts_with(&self.base_path)
    }

    /// Human-readable reason for the last class of rejection, used in logs.
    pub fn filter_reason(&self, raw: &str) -> &'static str {
        if url_utils::is_special_link(raw) {
            return "special scheme";
        }
        match Url::parse(raw) {
            Err(_) => "unparseable URL",
            Ok(parsed) if parsed.host_str() != Some(self.domain.as_str()) => "foreign host",
            Ok(_) => "outside base path and not a whitelisted asset",
        }
    }
}
