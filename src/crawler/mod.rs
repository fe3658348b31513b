//! Crawl orchestration
//!
//! This module contains the crawl engine proper:
//! - The collaborator traits for fetching ([`Fetch`], [`AsyncFetch`]) and
//!   parsing ([`Parse`]), with HTTP and HTML implementations
//! - The spider step shared by both scheduling models
//! - The crawl phase state machine
//! - Two orchestrators: [`ThreadedCrawler`] (OS threads) and
//!   [`CooperativeCrawler`] (tasks on one thread)

mod cooperative;
mod fetcher;
mod parser;
mod phase;
mod spider;
mod threaded;

pub use cooperative::{crawl_cooperative, CooperativeCrawler};
pub use fetcher::{
    build_blocking_http_client, build_http_client, AsyncFetch, BlockingHttpFetcher, Fetch,
    HttpFetcher,
};
pub use parser::{HtmlParser, Parse, ParseFailure, Parsed, ParsedPage};
pub use phase::CrawlPhase;
pub use threaded::{crawl, ThreadedCrawler};

use crate::config::CrawlerConfig;
use crate::processor::ProcessorReport;
use std::fmt;
use std::time::Duration;

/// A URL waiting in the frontier, with the depth it was discovered at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub url: String,
    pub depth: u32,
}

impl WorkItem {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
        }
    }

    /// The depth-0 item for the crawl's seed
    pub fn seed(url: impl Into<String>) -> Self {
        Self::new(url, 0)
    }
}

/// A successfully fetched and parsed page, handed to the processing stage
#[derive(Debug, Clone)]
pub struct FetchResult<D> {
    pub url: String,
    pub document: D,
}

/// Limits for a single crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Links found on pages at this depth are not followed
    pub max_depth: u32,
    /// Cap on distinct URLs ever admitted, the seed included
    pub max_pages: usize,
    /// Number of spider workers
    pub spider_workers: usize,
    /// Optional deadline for the whole crawl; see [`CompletionReason::TimedOut`]
    pub timeout: Option<Duration>,
}

impl CrawlSettings {
    /// Creates settings without a timeout
    ///
    /// A spider worker count of zero is raised to one.
    pub fn new(max_depth: u32, max_pages: usize, spider_workers: usize) -> Self {
        Self {
            max_depth,
            max_pages,
            spider_workers: spider_workers.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&CrawlerConfig> for CrawlSettings {
    fn from(config: &CrawlerConfig) -> Self {
        let settings = Self::new(config.max_depth, config.max_pages, config.spider_workers);
        match config.timeout_secs {
            Some(secs) => settings.with_timeout(Duration::from_secs(secs)),
            None => settings,
        }
    }
}

/// Why a crawl finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// Every reachable page within the depth bound was processed
    FrontierExhausted,
    /// The page budget turned away at least one unseen URL
    PageLimitReached,
    /// The deadline fired; workers were cancelled and the processing stage
    /// was aborted without draining
    TimedOut,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrontierExhausted => write!(f, "frontier exhausted"),
            Self::PageLimitReached => write!(f, "page limit reached"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Summary of a finished crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub reason: CompletionReason,
    /// Distinct URLs admitted by the gate, the seed included
    pub pages_admitted: usize,
    /// Pages fetched successfully
    pub pages_fetched: usize,
    /// Fetches that failed and were dropped
    pub fetch_failures: usize,
    pub processor: ProcessorReport,
}
