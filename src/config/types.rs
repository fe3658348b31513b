use serde::Deserialize;
use std::fmt;

/// Main configuration structure for Ripple-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
}

/// Crawl limits and scheduling model
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URL the crawl starts from
    pub seed: String,

    /// Links found on pages at this depth are not followed
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Cap on distinct pages admitted, the seed included
    #[serde(rename = "max-pages")]
    pub max_pages: usize,

    /// Number of spider workers
    #[serde(rename = "spider-workers")]
    pub spider_workers: usize,

    /// Which scheduling model runs the crawl
    #[serde(default)]
    pub model: CrawlModel,

    /// Deadline for the whole crawl; the crawl is aborted when it fires
    #[serde(rename = "timeout-secs", default)]
    pub timeout_secs: Option<u64>,
}

/// Scheduling model for spiders and processor workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlModel {
    /// One OS thread per worker
    #[default]
    Threaded,
    /// One task per worker, all on a single thread
    Cooperative,
}

impl fmt::Display for CrawlModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threaded => write!(f, "threaded"),
            Self::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// Processing stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Number of processor workers
    #[serde(default = "default_processor_workers")]
    pub workers: usize,

    /// Built-in handler run on every fetched page
    #[serde(default)]
    pub handler: HandlerKind,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_processor_workers(),
            handler: HandlerKind::default(),
        }
    }
}

fn default_processor_workers() -> usize {
    3
}

/// Built-in handlers selectable from the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    /// Log each page's URL and anchor count
    LinkCount,
    /// Print each page's URL and paragraph text
    TextPreview,
    /// Debug-log each page
    #[default]
    Log,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkCount => write!(f, "link-count"),
            Self::TextPreview => write!(f, "text-preview"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// HTTP client timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler; may be empty
    #[serde(rename = "contact-url", default)]
    pub contact_url: String,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header: `Name/Version (+ContactURL)`
    pub fn user_agent(&self) -> String {
        if self.contact_url.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, self.contact_url
            )
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "RippleCrawl".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: String::new(),
        }
    }
}
