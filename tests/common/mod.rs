//! Shared fixtures for crawl integration tests
//!
//! [`GraphFetcher`] serves an in-memory link graph as HTML so both
//! orchestrators can be driven end to end without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use ripple_crawl::crawler::{AsyncFetch, CrawlPhase, Fetch, ParsedPage};
use ripple_crawl::{canonical_key, Admission, FetchError, FetchResult, Handler, Telemetry};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const SITE: &str = "https://site.test";

/// Absolute URL for a page name on the test site
pub fn url(name: &str) -> String {
    format!("{}/{}", SITE, name)
}

#[derive(Default)]
struct Graph {
    pages: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Duration,
}

/// In-memory site; every clone shares the same fetch log
#[derive(Clone, Default)]
pub struct GraphFetcher {
    graph: Arc<Graph>,
    log: Arc<Mutex<Vec<String>>>,
}

/// Builder for [`GraphFetcher`]
#[derive(Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Adds a page named `name` linking to the named pages
    pub fn page(mut self, name: &str, links: &[&str]) -> Self {
        self.graph.pages.insert(
            canonical_key(&url(name)),
            links.iter().map(|link| url(link)).collect(),
        );
        self
    }

    /// Adds a page whose links are given as raw hrefs
    pub fn raw_page(mut self, name: &str, hrefs: &[&str]) -> Self {
        self.graph.pages.insert(
            canonical_key(&url(name)),
            hrefs.iter().map(|href| href.to_string()).collect(),
        );
        self
    }

    /// Makes every fetch of `name` fail
    pub fn fail(mut self, name: &str) -> Self {
        self.graph.failing.insert(canonical_key(&url(name)));
        self
    }

    /// Makes every fetch of `name` panic
    pub fn panic_on(mut self, name: &str) -> Self {
        self.graph.panicking.insert(canonical_key(&url(name)));
        self
    }

    /// Makes every fetch take `delay`
    pub fn delay(mut self, delay: Duration) -> Self {
        self.graph.delay = delay;
        self
    }

    pub fn build(self) -> GraphFetcher {
        GraphFetcher {
            graph: Arc::new(self.graph),
            log: Arc::default(),
        }
    }
}

impl GraphFetcher {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// `count` pages `p0..p{count}`, each linking to `fan_out` others
    pub fn mesh(count: usize, fan_out: usize) -> GraphBuilder {
        let names: Vec<String> = (0..count).map(|i| format!("p{}", i)).collect();
        let mut builder = Self::builder();
        for i in 0..count {
            let links: Vec<&str> = (1..=fan_out)
                .map(|k| names[(i * 7 + k * 13) % count].as_str())
                .collect();
            builder = builder.page(&names[i], &links);
        }
        builder
    }

    /// A chain `c0 -> c1 -> ... -> c{len - 1}`
    pub fn chain(len: usize) -> GraphBuilder {
        let mut builder = Self::builder();
        for i in 0..len {
            let next = format!("c{}", i + 1);
            let links: Vec<&str> = if i + 1 < len { vec![next.as_str()] } else { vec![] };
            builder = builder.page(&format!("c{}", i), &links);
        }
        builder
    }

    /// Every URL fetched, in the order the fetches started
    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Canonical keys fetched more than once
    pub fn duplicate_fetches(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.fetched()
            .into_iter()
            .map(|url| canonical_key(&url))
            .filter(|key| !seen.insert(key.clone()))
            .collect()
    }

    fn respond(&self, url: &str) -> Result<String, FetchError> {
        self.log.lock().unwrap().push(url.to_string());

        let key = canonical_key(url);
        if self.graph.panicking.contains(&key) {
            panic!("fetcher crashed on {}", url);
        }
        if self.graph.failing.contains(&key) {
            return Err(FetchError::Other {
                url: url.to_string(),
                message: "simulated failure".to_string(),
            });
        }

        let links = self.graph.pages.get(&key).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        let anchors: String = links
            .iter()
            .map(|link| format!(r#"<a href="{}">link</a>"#, link))
            .collect();
        Ok(format!(
            "<html><head><title>{}</title></head><body><p>Page {}</p>{}</body></html>",
            url, url, anchors
        ))
    }
}

impl Fetch for GraphFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if !self.graph.delay.is_zero() {
            thread::sleep(self.graph.delay);
        }
        self.respond(url)
    }
}

#[async_trait(?Send)]
impl AsyncFetch for GraphFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if self.graph.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.graph.delay).await;
        }
        self.respond(url)
    }
}

/// Handler that records the URL of every page it receives
pub fn collector() -> (
    impl Handler<FetchResult<ParsedPage>, Context = ()>,
    Arc<Mutex<Vec<String>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |item: FetchResult<ParsedPage>| -> anyhow::Result<()> {
            seen.lock().unwrap().push(item.url);
            Ok(())
        }
    };
    (handler, seen)
}

/// Telemetry that remembers phases and gate decisions
#[derive(Default)]
pub struct RecordingTelemetry {
    phases: Mutex<Vec<CrawlPhase>>,
    admitted: Mutex<Vec<(String, u32)>>,
    rejected: Mutex<Vec<(String, Admission)>>,
    panics: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn phases(&self) -> Vec<CrawlPhase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn admitted(&self) -> Vec<(String, u32)> {
        self.admitted.lock().unwrap().clone()
    }

    pub fn rejected(&self) -> Vec<(String, Admission)> {
        self.rejected.lock().unwrap().clone()
    }

    pub fn panics(&self) -> Vec<String> {
        self.panics.lock().unwrap().clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn phase_changed(&self, _from: CrawlPhase, to: CrawlPhase) {
        self.phases.lock().unwrap().push(to);
    }

    fn page_admitted(&self, url: &str, depth: u32) {
        self.admitted.lock().unwrap().push((url.to_string(), depth));
    }

    fn page_rejected(&self, url: &str, admission: Admission) {
        self.rejected.lock().unwrap().push((url.to_string(), admission));
    }

    fn iteration_panicked(&self, role: &'static str, worker: usize, message: &str) {
        self.panics
            .lock()
            .unwrap()
            .push(format!("{} {}: {}", role, worker, message));
    }
}

/// Sorted copy of a URL list
pub fn sorted(urls: &[String]) -> Vec<String> {
    let mut urls = urls.to_vec();
    urls.sort();
    urls
}
