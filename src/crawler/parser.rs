//! HTML extraction for fetched pages
//!
//! This module turns a response body into:
//! - The page title
//! - A short plain-text preview
//! - A small meta bag (description, keywords, author)
//! - Canonical outbound links, de-duplicated in document order

use crate::url::normalize_parsed;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use url::Url;

const MAX_TITLE_CHARS: usize = 200;
const MAX_PREVIEW_CHARS: usize = 500;

/// Elements whose text never contributes to the preview
const NON_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// `<meta name=...>` entries kept, with their length caps
const META_FIELDS: &[(&str, usize)] = &[("description", 300), ("keywords", 200), ("author", 100)];

/// Information extracted from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    /// The page title (from the <title> tag)
    pub title: Option<String>,

    /// Whitespace-collapsed visible text, truncated
    pub text_preview: String,

    pub meta: BTreeMap<String, String>,

    /// Canonical absolute http(s) links, unique, in document order
    pub links: Vec<Url>,
}

/// Outcome of extracting a fetched response
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractResult {
    Complete(ExtractedPage),

    /// The body could not be treated as HTML; whatever was recovered is kept
    Degraded { page: ExtractedPage, reason: String },
}

impl ExtractResult {
    pub fn page(&self) -> &ExtractedPage {
        match self {
            Self::Complete(page) | Self::Degraded { page, .. } => page,
        }
    }

    pub fn into_page(self) -> ExtractedPage {
        match self {
            Self::Complete(page) | Self::Degraded { page, .. } => page,
        }
    }

    /// Error descriptor to persist, if extraction was degraded
    pub fn error_descriptor(&self) -> Option<String> {
        match self {
            Self::Complete(_) => None,
            Self::Degraded { reason, .. } => Some(format!("extraction_degraded: {}", reason)),
        }
    }
}

/// Extracts a fetched response, checking its content type first
///
/// A response whose declared type is not HTML, or whose body is empty, is
/// reported as [`ExtractResult::Degraded`] with nothing extracted. A missing
/// content type is treated as HTML.
pub fn extract_response(content_type: Option<&str>, body: &str, base_url: &Url) -> ExtractResult {
    if let Some(content_type) = content_type {
        if !is_html_content_type(content_type) {
            return ExtractResult::Degraded {
                page: ExtractedPage::default(),
                reason: format!("non-html content type {}", content_type),
            };
        }
    }

    if body.trim().is_empty() {
        return ExtractResult::Degraded {
            page: ExtractedPage::default(),
            reason: "empty body".to_string(),
        };
    }

    ExtractResult::Complete(extract(body, base_url))
}

/// Whether a Content-Type header value denotes an HTML document
pub fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Parses HTML content and extracts title, preview, meta and links
///
/// Never fails: malformed markup yields whatever the parser recovers.
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - Fragment-only links (`#section`)
/// - Anything that is not http(s) after resolution (`javascript:`,
///   `mailto:`, `data:` ...)
///
/// # Example
///
/// ```
/// use onion_ripple::crawler::extract;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("http://example.onion/").unwrap();
/// let page = extract(html, &base_url);
/// assert_eq!(page.title, Some("Test".to_string()));
/// assert_eq!(page.links[0].as_str(), "http://example.onion/page");
/// ```
pub fn extract(html: &str, base_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);

    ExtractedPage {
        title: extract_title(&document),
        text_preview: extract_preview(&document),
        meta: extract_meta(&document),
        links: extract_links(&document, base_url),
    }
}

/// Collapses whitespace runs and caps the length, appending `...` when cut
fn clean_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        let mut cut: String = collapsed.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    } else {
        collapsed
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| clean_text(&element.text().collect::<String>(), MAX_TITLE_CHARS))
        .filter(|s| !s.is_empty())
}

fn extract_preview(document: &Html) -> String {
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    for node in body.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| NON_TEXT_ELEMENTS.contains(&el.name()))
                .unwrap_or(false)
        });
        if !hidden {
            text.push_str(fragment);
            text.push(' ');
        }
    }

    clean_text(&text, MAX_PREVIEW_CHARS)
}

fn extract_meta(document: &Html) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    let Ok(selector) = Selector::parse("meta[name][content]") else {
        return meta;
    };

    for element in document.select(&selector) {
        let (Some(name), Some(content)) =
            (element.value().attr("name"), element.value().attr("content"))
        else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let Some((key, cap)) = META_FIELDS.iter().find(|(key, _)| *key == name) else {
            continue;
        };
        if meta.contains_key(*key) {
            continue;
        }
        let value = clean_text(content, *cap);
        if !value.is_empty() {
            meta.insert(key.to_string(), value);
        }
    }

    meta
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    // links back to the page itself, e.g. `page#x`, are not edges
    if let Ok(own) = normalize_parsed(base_url.clone()) {
        seen.insert(own.as_str().to_string());
    }

    let Ok(a_selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&a_selector) {
        if element.value().attr("download").is_some() {
            continue;
        }

        if let Some(href) = element.value().attr("href") {
            if let Some(url) = resolve_link(href, base_url) {
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
        }
    }

    links
}

/// Resolves an href against the page URL and canonicalises it
///
/// Returns None for empty or fragment-only hrefs and for anything that is
/// not http(s) once resolved.
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match normalize_parsed(absolute) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::trace!("Dropping link {}: {}", href, e);
            None
        }
    }
}
