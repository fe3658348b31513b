//! Preemptive orchestrator: spiders are OS threads

use super::phase::{CrawlPhase, PhaseTracker};
use super::spider::{process_page, CrawlStats, SpiderOutcome, StepContext};
use super::{
    build_blocking_http_client, BlockingHttpFetcher, CompletionReason, CrawlReport, CrawlSettings,
    Fetch, FetchResult, HtmlParser, Parse, ParsedPage, WorkItem,
};
use crate::config::{HttpConfig, UserAgentConfig};
use crate::gate::SharedGate;
use crate::processor::{Handler, ThreadedProcessor, ThreadedSink};
use crate::queue::{BlockingQueue, Message, Tombstone};
use crate::telemetry::{panic_message, Telemetry, TracingTelemetry};
use crate::{CrawlError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Crawls with a pool of spider threads feeding a [`ThreadedProcessor`]
///
/// The crawler owns the fetcher, and with it the connection pool, until
/// both worker pools have stopped.
pub struct ThreadedCrawler<F, P> {
    fetcher: Arc<F>,
    parser: Arc<P>,
    settings: CrawlSettings,
    telemetry: Arc<dyn Telemetry>,
}

/// Everything one spider thread owns
struct Spider<F, P: Parse> {
    index: usize,
    frontier: BlockingQueue<WorkItem>,
    gate: SharedGate,
    sink: ThreadedSink<FetchResult<P::Document>>,
    fetcher: Arc<F>,
    parser: Arc<P>,
    max_depth: u32,
    stats: Arc<CrawlStats>,
    telemetry: Arc<dyn Telemetry>,
}

impl<F, P> ThreadedCrawler<F, P>
where
    F: Fetch + 'static,
    P: Parse + 'static,
{
    pub fn new(fetcher: F, parser: P, settings: CrawlSettings) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            parser: Arc::new(parser),
            settings,
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Runs a crawl from `seed` to completion
    ///
    /// Seeds the frontier through the gate, starts `processor` and the
    /// spiders, waits for the frontier to drain, then stops the spiders
    /// before shutting the processor down. With a timeout configured, a
    /// frontier that has not drained in time aborts both pools instead.
    ///
    /// # Errors
    ///
    /// Fetch, parse and handler failures never fail the crawl. Errors are
    /// returned only when a worker cannot be spawned or dies outside of an
    /// iteration.
    pub fn crawl<H>(
        self,
        seed: &str,
        mut processor: ThreadedProcessor<FetchResult<P::Document>, H>,
    ) -> Result<CrawlReport>
    where
        H: Handler<FetchResult<P::Document>>,
    {
        let mut phase = PhaseTracker::new(Arc::clone(&self.telemetry));
        let frontier = BlockingQueue::new();
        let gate = SharedGate::new(self.settings.max_pages);
        let stats = Arc::new(CrawlStats::default());

        tracing::info!(
            "Starting threaded crawl of {} ({} spiders, {} processor workers, max depth {}, max pages {})",
            seed,
            self.settings.spider_workers,
            processor.workers(),
            self.settings.max_depth,
            self.settings.max_pages
        );

        match gate.admit_then(seed, || frontier.put(WorkItem::seed(seed))) {
            admission if admission.is_admitted() => self.telemetry.page_admitted(seed, 0),
            rejected => self.telemetry.page_rejected(seed, rejected),
        }

        processor.start()?;
        let spiders = match self.spawn_spiders(&frontier, &gate, &stats, processor.sink()) {
            Ok(spiders) => spiders,
            Err(error) => {
                processor.abort();
                return Err(error);
            }
        };
        phase.advance(CrawlPhase::Seeded)?;

        phase.advance(CrawlPhase::Draining)?;
        let drained = match self.settings.timeout {
            Some(timeout) => frontier.wait_drained_timeout(timeout),
            None => {
                frontier.wait_drained();
                true
            }
        };

        let (reason, processor_report) = if drained {
            phase.advance(CrawlPhase::SpiderShutdown)?;
            for _ in &spiders {
                frontier.put_tombstone(Tombstone::new());
            }
            let joined = join_spiders(spiders);

            phase.advance(CrawlPhase::ProcessorShutdown)?;
            let processor_report = processor.shutdown()?;
            joined?;

            let reason = if gate.limit_reached() {
                CompletionReason::PageLimitReached
            } else {
                CompletionReason::FrontierExhausted
            };
            (reason, processor_report)
        } else {
            phase.advance(CrawlPhase::Aborted)?;
            tracing::warn!(
                "Crawl timed out with {} items outstanding; aborting",
                frontier.pending()
            );
            // In-flight fetches finish on their own request timeout
            frontier.close();
            if let Err(error) = join_spiders(spiders) {
                tracing::warn!("{}", error);
            }
            (CompletionReason::TimedOut, processor.abort())
        };

        phase.advance(CrawlPhase::Done)?;
        drop(self.fetcher);
        tracing::debug!("Released fetcher");

        let report = CrawlReport {
            reason,
            pages_admitted: gate.admitted(),
            pages_fetched: stats.fetched(),
            fetch_failures: stats.failures(),
            processor: processor_report,
        };
        tracing::info!(
            "Crawl finished ({}): {} admitted, {} fetched, {} failed",
            report.reason,
            report.pages_admitted,
            report.pages_fetched,
            report.fetch_failures
        );
        Ok(report)
    }

    fn spawn_spiders(
        &self,
        frontier: &BlockingQueue<WorkItem>,
        gate: &SharedGate,
        stats: &Arc<CrawlStats>,
        sink: ThreadedSink<FetchResult<P::Document>>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.settings.spider_workers);

        for index in 0..self.settings.spider_workers {
            let spider = Spider {
                index,
                frontier: frontier.clone(),
                gate: gate.clone(),
                sink: sink.clone(),
                fetcher: Arc::clone(&self.fetcher),
                parser: Arc::clone(&self.parser),
                max_depth: self.settings.max_depth,
                stats: Arc::clone(stats),
                telemetry: Arc::clone(&self.telemetry),
            };

            let spawned = thread::Builder::new()
                .name(format!("spider-{}", index))
                .spawn(move || spider.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    frontier.close();
                    if let Err(error) = join_spiders(handles) {
                        tracing::warn!("{}", error);
                    }
                    return Err(CrawlError::WorkerSpawn {
                        role: "spider",
                        index,
                        source,
                    });
                }
            }
        }

        Ok(handles)
    }
}

impl<F: Fetch, P: Parse> Spider<F, P> {
    fn run(self) {
        let step = StepContext {
            parser: &*self.parser,
            max_depth: self.max_depth,
            stats: &self.stats,
            telemetry: &*self.telemetry,
        };

        loop {
            let item = match self.frontier.get() {
                Message::Job(item) => item,
                Message::Tombstone(_) => break,
            };

            let _done = self.frontier.done_guard();
            let iteration = panic::catch_unwind(AssertUnwindSafe(|| {
                let content = self.fetcher.fetch(&item.url);
                process_page(
                    &item,
                    content,
                    &step,
                    |result| self.sink.accept(result),
                    |link, depth| {
                        self.gate
                            .admit_then(link, || self.frontier.put(WorkItem::new(link, depth)))
                    },
                )
            }));

            match iteration {
                Ok(SpiderOutcome::Fetched { links, admitted }) => tracing::trace!(
                    "Spider {} followed {} of {} links from {}",
                    self.index,
                    admitted,
                    links,
                    item.url
                ),
                Ok(SpiderOutcome::Partial | SpiderOutcome::Dropped) => {}
                Err(payload) => {
                    self.telemetry
                        .iteration_panicked("spider", self.index, &panic_message(&*payload))
                }
            }
        }

        tracing::trace!("Spider {} exited", self.index);
    }
}

fn join_spiders(handles: Vec<JoinHandle<()>>) -> Result<()> {
    let mut first_error = None;
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() && first_error.is_none() {
            first_error = Some(CrawlError::WorkerPanicked {
                role: "spider",
                index,
            });
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Crawls over HTTP with default client settings, parsing pages as HTML
///
/// Must not be called from inside an async runtime.
///
/// # Arguments
///
/// * `seed_url` - Where the crawl starts, at depth 0
/// * `max_depth` - Links on pages at this depth are not followed
/// * `max_pages` - Cap on distinct URLs admitted, the seed included
/// * `spider_workers` - Number of spider threads
/// * `processor` - The processing stage receiving every fetched page
pub fn crawl<H>(
    seed_url: &str,
    max_depth: u32,
    max_pages: usize,
    spider_workers: usize,
    processor: ThreadedProcessor<FetchResult<ParsedPage>, H>,
) -> Result<CrawlReport>
where
    H: Handler<FetchResult<ParsedPage>>,
{
    let client = build_blocking_http_client(&UserAgentConfig::default(), &HttpConfig::default())?;
    ThreadedCrawler::new(
        BlockingHttpFetcher::new(client),
        HtmlParser,
        CrawlSettings::new(max_depth, max_pages, spider_workers),
    )
    .crawl(seed_url, processor)
}
