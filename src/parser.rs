//! Outbound-link extraction from HTML and CSS byte streams.
//!
//! Parsers emit raw resolved URLs in document order and never transform
//! extensions; any rewriting is the rewriter's job.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

use crate::url_utils;

/// Substrings that cause a raw link to be dropped at parse time
/// (tracker shortcodes, payment-service references, messenger handles).
pub const DOMAIN_DENYLIST: &[&str] = &["devnull", "410011174743222", "yoomoney", "t.me/metanitcom"];

/// The bounded set of content parsers, dispatched by content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentParser {
    Html,
    Css,
}

impl ContentParser {
    /// All parsers, in the order they are tried against a response.
    pub fn all() -> [ContentParser; 2] {
        [ContentParser::Html, ContentParser::Css]
    }

    pub fn can_parse(&self, content_type: &str) -> bool {
        match self {
            ContentParser::Html => content_type.contains("text/html"),
            ContentParser::Css => content_type.contains("text/css"),
        }
    }

    /// Extract outbound links, resolved against the document's own URL.
    /// Malformed markup degrades gracefully; it never fails.
    pub fn parse(&self, content: &[u8], base_url: &Url) -> Vec<String> {
        let text = String::from_utf8_lossy(content);
        let raw_links = match self {
            ContentParser::Html => extract_html_links(&text),
            ContentParser::Css => extract_css_links(&text),
        };
        resolve_raw_links(&raw_links, base_url)
    }
}

/// Attribute values of `href` on `<a>`/`<link>` and `src` on
/// `<img>`/`<script>`/`<source>`, in document order.
fn extract_html_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href], link[href], img[src], script[src], source[src]")
        .expect("Invalid CSS selector");

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let attr = match element.value().name() {
            "a" | "link" => "href",
            _ => "src",
        };
        if let Some(value) = element.value().attr(attr) {
            links.push(value.to_string());
        }
    }
    links
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\s*\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("Invalid CSS url regex")
    })
}

/// All `url(...)` operands, quoted or unquoted.
fn extract_css_links(css: &str) -> Vec<String> {
    css_url_regex()
        .captures_iter(css)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Resolve raw links against the base, dropping special schemes and
/// denylisted targets. Extensions are left untouched.
fn resolve_raw_links(links: &[String], base_url: &Url) -> Vec<String> {
    let mut resolved = Vec::with_capacity(links.len());
    for raw in links {
        let Some(url) = url_utils::resolve_link(base_url, raw) else {
            continue;
        };
        let url = url.to_string();
        if DOMAIN_DENYLIST.iter().any(|bad| url.contains(bad)) {
            tracing::debug!(url = %url, "dropping denylisted link");
            continue;
        }
        resolved.push(url);
    }
    resolved
}
