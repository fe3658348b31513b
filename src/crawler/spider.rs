//! The per-item spider step shared by both scheduling models
//!
//! Everything after the fetch is synchronous: parse, hand the page to the
//! processing stage, then offer each link to the gate. The orchestrators
//! differ only in how they fetch and in the primitives behind `submit` and
//! `admit`.

use super::{FetchResult, Parse, ParseFailure, Parsed, WorkItem};
use crate::gate::Admission;
use crate::telemetry::Telemetry;
use crate::FetchError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fetch counters shared by a crawl's spiders
#[derive(Debug, Default)]
pub(crate) struct CrawlStats {
    fetched: AtomicUsize,
    failures: AtomicUsize,
}

impl CrawlStats {
    pub(crate) fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Result of one spider iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpiderOutcome {
    /// Page submitted; `admitted` of its `links` were enqueued
    Fetched { links: usize, admitted: usize },
    /// Parse failed but a partial page was submitted
    Partial,
    /// Nothing was submitted
    Dropped,
}

/// Wiring a spider step needs besides the page itself
pub(crate) struct StepContext<'a, P> {
    pub(crate) parser: &'a P,
    pub(crate) max_depth: u32,
    pub(crate) stats: &'a CrawlStats,
    pub(crate) telemetry: &'a dyn Telemetry,
}

/// Handles one fetched (or failed) work item
///
/// `submit` hands the page to the processing stage. `admit` offers a link
/// at the given depth to the gate and enqueues it if admitted; it must not
/// suspend.
pub(crate) fn process_page<P: Parse>(
    item: &WorkItem,
    content: Result<String, FetchError>,
    ctx: &StepContext<'_, P>,
    submit: impl FnOnce(FetchResult<P::Document>),
    mut admit: impl FnMut(&str, u32) -> Admission,
) -> SpiderOutcome {
    let content = match content {
        Ok(content) => content,
        Err(error) => {
            ctx.stats.failures.fetch_add(1, Ordering::SeqCst);
            ctx.telemetry.fetch_failed(&item.url, &error);
            return SpiderOutcome::Dropped;
        }
    };

    let Parsed { document, links } = match ctx.parser.parse(&item.url, &content) {
        Ok(parsed) => parsed,
        Err(ParseFailure { error, partial }) => {
            ctx.telemetry.parse_failed(&item.url, &error);
            return match partial {
                Some(document) => {
                    ctx.stats.fetched.fetch_add(1, Ordering::SeqCst);
                    ctx.telemetry.page_fetched(&item.url, item.depth, 0);
                    submit(FetchResult {
                        url: item.url.clone(),
                        document,
                    });
                    SpiderOutcome::Partial
                }
                None => SpiderOutcome::Dropped,
            };
        }
    };

    ctx.stats.fetched.fetch_add(1, Ordering::SeqCst);
    ctx.telemetry.page_fetched(&item.url, item.depth, links.len());
    submit(FetchResult {
        url: item.url.clone(),
        document,
    });

    let mut admitted = 0;
    if item.depth < ctx.max_depth {
        let depth = item.depth + 1;
        for link in &links {
            match admit(link, depth) {
                Admission::Admitted => {
                    admitted += 1;
                    ctx.telemetry.page_admitted(link, depth);
                }
                rejected => ctx.telemetry.page_rejected(link, rejected),
            }
        }
    }

    SpiderOutcome::Fetched {
        links: links.len(),
        admitted,
    }
}
