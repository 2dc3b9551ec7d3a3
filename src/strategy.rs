//! Save-strategy analysis: one of two filesystem layouts per URL.
//!
//! `DirectoryIndex` treats the URL as a directory and stores its content as
//! `<path>/index.html`; `FileOnly` stores the content at the path itself.
//! The analyzer picks a strategy from the URL path, the Content-Type header,
//! and a short sniff of the body, first match wins.

/// Extensions that always name a concrete resource file.
pub const RESOURCE_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".cjs", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp",
    ".woff", ".woff2", ".ttf", ".eot", ".otf", ".mp4", ".webm", ".mp3", ".wav", ".ogg", ".avi",
    ".mov", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".7z",
    ".tar", ".gz", ".json", ".xml", ".txt", ".csv",
];

/// Extensions of server-rendered pages, stripped by the DirectoryIndex layout.
pub const PAGE_EXTENSIONS: &[&str] = &[".php", ".html", ".htm", ".asp", ".aspx", ".jsp"];

const RESOURCE_CONTENT_TYPES: &[&str] = &[
    "text/css",
    "application/javascript",
    "application/x-javascript",
    "image/",
    "font/",
    "audio/",
    "video/",
    "application/pdf",
    "application/zip",
    "application/json",
    "application/xml",
];

const STATIC_PATH_PATTERNS: &[&str] = &[
    "/static/", "/assets/", "/public/", "/resources/", "/css/", "/js/", "/images/", "/img/",
    "/fonts/", "/uploads/", "/media/", "/downloads/",
];

const API_PATH_PATTERNS: &[&str] = &["/api/", "/ajax/", "/rest/", "/graphql", "/auth/"];

const SNIFF_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStrategy {
    /// Content is written to `<host>/<path>/index.html`.
    DirectoryIndex,
    /// Content is written to `<host>/<path>` verbatim.
    FileOnly,
}

/// Choose a strategy for a URL path given the response's Content-Type and body.
pub fn analyze(path: &str, content_type: &str, content: &[u8]) -> SaveStrategy {
    let lower_path = path.to_ascii_lowercase();

    // 1. Explicit resource extension.
    if RESOURCE_EXTENSIONS.iter().any(|e| lower_path.ends_with(e)) {
        return SaveStrategy::FileOnly;
    }

    // 2/3. Explicit Content-Type signals.
    if !content_type.is_empty() {
        if RESOURCE_CONTENT_TYPES
            .iter()
            .any(|ct| content_type.contains(ct))
        {
            return SaveStrategy::FileOnly;
        }
        if content_type.contains("text/html") {
            return SaveStrategy::DirectoryIndex;
        }
    }

    // 4. No usable Content-Type: sniff the body, then fall back to the
    // page extension so a mislabelled HTML page is not stored flat.
    if content_type.is_empty() || content_type == "application/octet-stream" {
        let window = &content[..content.len().min(SNIFF_WINDOW)];
        let sample = String::from_utf8_lossy(window).to_ascii_lowercase();
        if ["<!doctype", "<html", "<head", "<body"]
            .iter()
            .any(|tag| sample.contains(tag))
        {
            return SaveStrategy::DirectoryIndex;
        }
        if PAGE_EXTENSIONS.iter().any(|e| lower_path.ends_with(e)) {
            return SaveStrategy::DirectoryIndex;
        }
    }

    // 5. Typical static-resource directories.
    if STATIC_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
        return SaveStrategy::FileOnly;
    }

    // 6. Extension-less paths are pages unless they look like API endpoints.
    if !path.contains('.') && path != "/" && !path.is_empty() {
        if API_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
            return SaveStrategy::FileOnly;
        }
        return SaveStrategy::DirectoryIndex;
    }

    SaveStrategy::DirectoryIndex
}

/// Strategy from the path alone, with no response at hand. Used by the link
/// rewriter, which sees URLs before (or without) any fetch.
pub fn analyze_path(path: &str) -> SaveStrategy {
    analyze(path, "", &[])
}
