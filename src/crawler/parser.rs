//! HTML parsing and link extraction
//!
//! [`Parse`] turns fetched content into an opaque document plus the set of
//! outbound links. [`HtmlParser`] is the scraper-backed implementation: it
//! keeps the title, the anchor count and the paragraph text, and resolves
//! every followable anchor against the page URL.

use crate::ParseError;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Output of a successful parse
#[derive(Debug, Clone)]
pub struct Parsed<D> {
    pub document: D,
    /// Absolute outbound links; duplicates on one page collapse here
    pub links: HashSet<String>,
}

/// A parse that failed, possibly leaving a usable partial document
///
/// A partial document is still handed to the processing stage; its page
/// contributes no links.
#[derive(Debug)]
pub struct ParseFailure<D> {
    pub error: ParseError,
    pub partial: Option<D>,
}

/// Content parser used by spiders
pub trait Parse: Send + Sync {
    /// What the processing stage receives for each page
    type Document: Send + 'static;

    fn parse(
        &self,
        base_url: &str,
        content: &str,
    ) -> Result<Parsed<Self::Document>, ParseFailure<Self::Document>>;
}

/// What [`HtmlParser`] keeps from a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    url: String,
    title: Option<String>,
    link_count: usize,
    paragraphs: Vec<String>,
}

impl ParsedPage {
    pub fn new(
        url: impl Into<String>,
        title: Option<String>,
        link_count: usize,
        paragraphs: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title,
            link_count,
            paragraphs,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Number of `<a href>` elements on the page, followable or not
    pub fn link_count(&self) -> usize {
        self.link_count
    }

    /// Text of each `<p>` element, in document order
    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }
}

/// [`Parse`] implementation backed by `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl Parse for HtmlParser {
    type Document = ParsedPage;

    /// Parses a page and extracts its followable links
    ///
    /// # Link Extraction Rules
    ///
    /// **Include:** `<a href="...">` resolving to http or https
    ///
    /// **Exclude:**
    /// - `<a href="..." download>`
    /// - `javascript:`, `mailto:`, `tel:` and `data:` links
    /// - Fragment-only links (same page anchors)
    ///
    /// Fragments are stripped from the links that remain. If `base_url` is
    /// unusable the page is returned as a partial document with no links.
    fn parse(
        &self,
        base_url: &str,
        content: &str,
    ) -> Result<Parsed<ParsedPage>, ParseFailure<ParsedPage>> {
        let html = Html::parse_document(content);
        let page = ParsedPage {
            url: base_url.to_string(),
            title: extract_title(&html),
            link_count: count_anchors(&html),
            paragraphs: extract_paragraphs(&html),
        };

        match Url::parse(base_url) {
            Ok(base) => Ok(Parsed {
                links: extract_links(&html, &base),
                document: page,
            }),
            Err(source) => Err(ParseFailure {
                error: ParseError::InvalidBaseUrl {
                    url: base_url.to_string(),
                    source,
                },
                partial: Some(page),
            }),
        }
    }
}

fn extract_title(html: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    html.select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

fn count_anchors(html: &Html) -> usize {
    match Selector::parse("a[href]") {
        Ok(selector) => html.select(&selector).count(),
        Err(_) => 0,
    }
}

fn extract_paragraphs(html: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("p") else {
        return Vec::new();
    };

    html.select(&selector)
        .map(|element| element.text().collect::<String>())
        .collect()
}

fn extract_links(html: &Html, base: &Url) -> HashSet<String> {
    let mut links = HashSet::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in html.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base))
            {
                links.insert(link);
            }
        }
    }

    links
}

/// Resolves an href against the page URL
///
/// Returns `None` for links that should not be followed.
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    resolved.set_fragment(None);
    Some(resolved.to_string())
}
