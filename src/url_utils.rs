//! URL helper functions used throughout the crawler

use url::Url;

/// URL prefixes that are never fetchable and never rewritten.
pub const SPECIAL_PREFIXES: &[&str] = &[
    "#",
    "javascript:",
    "mailto:",
    "tel:",
    "data:",
    "file:",
];

/// Check whether a raw link uses one of the special, non-fetchable schemes.
pub fn is_special_link(raw: &str) -> bool {
    SPECIAL_PREFIXES.iter().any(|p| raw.starts_with(p))
}

/// Canonicalize a URL.
///
/// Drops the fragment, replaces an empty path with `/`, and strips a trailing
/// `index.html`/`index.htm` file name while keeping the directory slash:
/// `https://ex.com/blog/index.html?p=1#top` becomes `https://ex.com/blog/?p=1`.
/// Query parameters and scheme/host casing are preserved.
pub fn normalize(raw: &str) -> Result<Url, url::ParseError> {
    let mut parsed = Url::parse(raw.trim())?;
    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    let lower = path.to_ascii_lowercase();

    let mut normalized = path.clone();
    for suffix in ["/index.html", "/index.htm"] {
        if lower.ends_with(suffix) {
            // Drop the file name, keep the directory slash.
            normalized.truncate(path.len() - (suffix.len() - 1));
            break;
        }
    }
    if normalized == path {
        for suffix in ["index.html", "index.htm"] {
            if lower.ends_with(suffix) {
                normalized.truncate(path.len() - suffix.len());
                break;
            }
        }
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    if normalized != path {
        parsed.set_path(&normalized);
    }

    Ok(parsed)
}

/// Resolve a raw link against the document's own URL.
///
/// Protocol-relative links (`//host/...`) are pinned to `https:` before
/// resolution. Returns `None` for unresolvable links.
pub fn resolve_link(base: &Url, raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_special_link(trimmed) {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix("//") {
        return Url::parse(&format!("https://{}", rest)).ok();
    }

    base.join(trimmed).ok()
}

/// Extract the host portion of a URL string.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}
