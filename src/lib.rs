//! Ripple-Crawl: a bounded-concurrency web crawler
//!
//! This crate crawls a site breadth-first from a seed URL, up to a depth and a
//! page budget, handing every fetched page to a downstream processing stage.
//! The same contract is realized twice: a preemptive crawler built on OS
//! threads and a cooperative crawler built on tasks sharing one thread.

pub mod config;
pub mod crawler;
pub mod gate;
pub mod processor;
pub mod queue;
pub mod telemetry;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn {role} worker {index}: {source}")]
    WorkerSpawn {
        role: &'static str,
        index: usize,
        source: std::io::Error,
    },

    #[error("{role} worker {index} panicked outside of an iteration")]
    WorkerPanicked { role: &'static str, index: usize },

    #[error("Invalid crawl phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crawler::CrawlPhase,
        to: crawler::CrawlPhase,
    },

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Why a single fetch produced no content
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("Fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Expected HTML from {url}, got {content_type}")]
    ContentMismatch { url: String, content_type: String },

    #[error("Fetching {url} failed: {message}")]
    Other { url: String, message: String },
}

/// Why a fetched page could not be turned into a document
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid base URL {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        source: ::url::ParseError,
    },

    #[error("Malformed content from {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Result type alias for Ripple-Crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    CompletionReason, CooperativeCrawler, CrawlReport, CrawlSettings, FetchResult, ThreadedCrawler,
    WorkItem,
};
pub use gate::{Admission, DedupGate};
pub use processor::{
    AsyncHandler, Handler, Lifecycle, LocalProcessor, ProcessorReport, ThreadedProcessor,
};
pub use telemetry::{Telemetry, TracingTelemetry};
pub use url::{canonical_key, normalize, UrlKey};
