//! Page fetching
//!
//! Spiders see fetching only through [`Fetch`] (blocking, for OS threads)
//! and [`AsyncFetch`] (for tasks). The HTTP implementations here:
//! - Build clients with the configured user agent and timeouts
//! - Treat non-2xx statuses as failures
//! - Reject responses that declare a non-HTML content type
//!
//! There is no retry: a failed fetch is reported and the URL is dropped.

use crate::config::{HttpConfig, UserAgentConfig};
use crate::FetchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;

/// Blocking page source used by threaded spiders
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Page source used by cooperative spiders
///
/// The returned future may be `!Send`; cooperative spiders never leave
/// their thread.
#[async_trait(?Send)]
pub trait AsyncFetch {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Builds the async HTTP client shared by every cooperative spider
///
/// # Arguments
///
/// * `user_agent` - Identification sent with every request
/// * `http` - Request and connect timeouts
///
/// # Example
///
/// ```no_run
/// use ripple_crawl::config::{HttpConfig, UserAgentConfig};
/// use ripple_crawl::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    http: &HttpConfig,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(user_agent.user_agent())
        .timeout(Duration::from_secs(http.request_timeout_secs))
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Builds the pooled blocking HTTP client shared by threaded spiders
///
/// Must not be called, or the client dropped, from inside an async runtime.
pub fn build_blocking_http_client(
    user_agent: &UserAgentConfig,
    http: &HttpConfig,
) -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .user_agent(user_agent.user_agent())
        .timeout(Duration::from_secs(http.request_timeout_secs))
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetch`] over a pooled `reqwest::blocking::Client`
#[derive(Debug, Clone)]
pub struct BlockingHttpFetcher {
    client: reqwest::blocking::Client,
}

impl BlockingHttpFetcher {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Fetch for BlockingHttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        check_response(url, response.status(), response.headers())?;

        response.text().map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

/// [`AsyncFetch`] over one shared `reqwest::Client` session
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl AsyncFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        check_response(url, response.status(), response.headers())?;

        response.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

/// Rejects error statuses and declared non-HTML bodies
///
/// A missing `Content-Type` is accepted and left to the parser.
fn check_response(url: &str, status: StatusCode, headers: &HeaderMap) -> Result<(), FetchError> {
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let Some(content_type) = headers.get(CONTENT_TYPE) else {
        return Ok(());
    };

    let content_type = content_type.to_str().unwrap_or("").to_ascii_lowercase();
    if is_html(&content_type) {
        Ok(())
    } else {
        Err(FetchError::ContentMismatch {
            url: url.to_string(),
            content_type,
        })
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}
