//! Cooperative orchestrator: spiders are tasks on one thread
//!
//! The whole crawl runs inside a `tokio::task::LocalSet`. A spider suspends
//! only in `get` and in `fetch`; the gate check and the enqueue that follows
//! it happen between suspension points, so no lock is needed.

use super::phase::{CrawlPhase, PhaseTracker};
use super::spider::{process_page, CrawlStats, SpiderOutcome, StepContext};
use super::{
    build_http_client, AsyncFetch, CompletionReason, CrawlReport, CrawlSettings, FetchResult,
    HtmlParser, HttpFetcher, Parse, ParsedPage, WorkItem,
};
use crate::config::{HttpConfig, UserAgentConfig};
use crate::gate::LocalGate;
use crate::processor::{AsyncHandler, LocalProcessor, LocalSink};
use crate::queue::{LocalQueue, Message, Tombstone};
use crate::telemetry::{panic_message, Telemetry, TracingTelemetry};
use crate::{CrawlError, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use tokio::task::{self, JoinHandle, LocalSet};

/// Crawls with spider tasks feeding a [`LocalProcessor`]
///
/// All spiders share one fetcher, typically a single HTTP session, which
/// the crawler releases once both pools have stopped.
pub struct CooperativeCrawler<F, P> {
    fetcher: Rc<F>,
    parser: Rc<P>,
    settings: CrawlSettings,
    telemetry: Arc<dyn Telemetry>,
}

/// Everything one spider task owns
struct Spider<F, P: Parse> {
    index: usize,
    frontier: LocalQueue<WorkItem>,
    gate: LocalGate,
    sink: LocalSink<FetchResult<P::Document>>,
    fetcher: Rc<F>,
    parser: Rc<P>,
    max_depth: u32,
    stats: Rc<CrawlStats>,
    telemetry: Arc<dyn Telemetry>,
}

impl<F, P> CooperativeCrawler<F, P>
where
    F: AsyncFetch + 'static,
    P: Parse + 'static,
{
    pub fn new(fetcher: F, parser: P, settings: CrawlSettings) -> Self {
        Self {
            fetcher: Rc::new(fetcher),
            parser: Rc::new(parser),
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
    /// Must be awaited inside a tokio runtime; the crawl provides its own
    /// `LocalSet`. The phases match [`ThreadedCrawler::crawl`], except that
    /// on timeout the spider tasks are cancelled mid-fetch.
    ///
    /// [`ThreadedCrawler::crawl`]: super::ThreadedCrawler::crawl
    pub async fn crawl<H>(
        self,
        seed: &str,
        processor: LocalProcessor<FetchResult<P::Document>, H>,
    ) -> Result<CrawlReport>
    where
        H: AsyncHandler<FetchResult<P::Document>>,
    {
        LocalSet::new().run_until(self.run(seed, processor)).await
    }

    async fn run<H>(
        self,
        seed: &str,
        mut processor: LocalProcessor<FetchResult<P::Document>, H>,
    ) -> Result<CrawlReport>
    where
        H: AsyncHandler<FetchResult<P::Document>>,
    {
        let mut phase = PhaseTracker::new(Arc::clone(&self.telemetry));
        let frontier = LocalQueue::new();
        let gate = LocalGate::new(self.settings.max_pages);
        let stats = Rc::new(CrawlStats::default());

        tracing::info!(
            "Starting cooperative crawl of {} ({} spiders, {} processor workers, max depth {}, max pages {})",
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

        processor.start();
        let spiders = self.spawn_spiders(&frontier, &gate, &stats, processor.sink());
        phase.advance(CrawlPhase::Seeded)?;

        phase.advance(CrawlPhase::Draining)?;
        let drained = match self.settings.timeout {
            Some(timeout) => tokio::time::timeout(timeout, frontier.wait_drained())
                .await
                .is_ok(),
            None => {
                frontier.wait_drained().await;
                true
            }
        };

        let (reason, processor_report) = if drained {
            phase.advance(CrawlPhase::SpiderShutdown)?;
            for _ in &spiders {
                frontier.put_tombstone(Tombstone::new());
            }
            let joined = join_spiders(spiders).await;

            phase.advance(CrawlPhase::ProcessorShutdown)?;
            let processor_report = processor.shutdown().await?;
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
                "Crawl timed out with {} items outstanding; cancelling spiders",
                frontier.pending()
            );
            frontier.close();
            cancel_spiders(spiders).await;
            (CompletionReason::TimedOut, processor.abort().await)
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
        frontier: &LocalQueue<WorkItem>,
        gate: &LocalGate,
        stats: &Rc<CrawlStats>,
        sink: LocalSink<FetchResult<P::Document>>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.settings.spider_workers)
            .map(|index| {
                let spider = Spider {
                    index,
                    frontier: frontier.clone(),
                    gate: gate.clone(),
                    sink: sink.clone(),
                    fetcher: Rc::clone(&self.fetcher),
                    parser: Rc::clone(&self.parser),
                    max_depth: self.settings.max_depth,
                    stats: Rc::clone(stats),
                    telemetry: Arc::clone(&self.telemetry),
                };
                task::spawn_local(spider.run())
            })
            .collect()
    }
}

impl<F: AsyncFetch, P: Parse> Spider<F, P> {
    async fn run(self) {
        let step = StepContext {
            parser: &*self.parser,
            max_depth: self.max_depth,
            stats: &self.stats,
            telemetry: &*self.telemetry,
        };

        loop {
            let item = match self.frontier.get().await {
                Message::Job(item) => item,
                Message::Tombstone(_) => break,
            };

            let _done = self.frontier.done_guard();
            let iteration = AssertUnwindSafe(async {
                let content = self.fetcher.fetch(&item.url).await;
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
            })
            .catch_unwind()
            .await;

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

/// Cancels every spider task and waits for it to finish
///
/// Returns how many of them had already died from a panic rather than being
/// cancelled.
async fn cancel_spiders(handles: Vec<JoinHandle<()>>) -> usize {
    for handle in &handles {
        handle.abort();
    }

    let mut panicked = 0;
    for (index, handle) in handles.into_iter().enumerate() {
        if let Err(error) = handle.await {
            if error.is_panic() {
                tracing::warn!("spider worker {} panicked outside of an iteration", index);
                panicked += 1;
            }
        }
    }
    panicked
}

async fn join_spiders(handles: Vec<JoinHandle<()>>) -> Result<()> {
    let mut first_error = None;
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.await.is_err() && first_error.is_none() {
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

/// Crawls over HTTP with one shared session, parsing pages as HTML
///
/// Takes the same arguments as [`crawl`](super::crawl) but runs every
/// worker as a task on the current thread.
pub async fn crawl_cooperative<H>(
    seed_url: &str,
    max_depth: u32,
    max_pages: usize,
    spider_workers: usize,
    processor: LocalProcessor<FetchResult<ParsedPage>, H>,
) -> Result<CrawlReport>
where
    H: AsyncHandler<FetchResult<ParsedPage>>,
{
    let client = build_http_client(&UserAgentConfig::default(), &HttpConfig::default())?;
    CooperativeCrawler::new(
        HttpFetcher::new(client),
        HtmlParser,
        CrawlSettings::new(max_depth, max_pages, spider_workers),
    )
    .crawl(seed_url, processor)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_spiders_tells_panics_from_cancellation() {
        let panicked = LocalSet::new()
            .run_until(async {
                let crashed: JoinHandle<()> =
                    task::spawn_local(async { panic!("spider crashed") });
                let idle = task::spawn_local(tokio::time::sleep(Duration::from_secs(60)));
                while !crashed.is_finished() {
                    task::yield_now().await;
                }
                cancel_spiders(vec![crashed, idle]).await
            })
            .await;

        assert_eq!(panicked, 1);
    }

    #[tokio::test]
    async fn test_cancel_spiders_with_no_panics() {
        let panicked = LocalSet::new()
            .run_until(async {
                let handles = (0..3)
                    .map(|_| task::spawn_local(tokio::time::sleep(Duration::from_secs(60))))
                    .collect();
                cancel_spiders(handles).await
            })
            .await;

        assert_eq!(panicked, 0);
    }
}
