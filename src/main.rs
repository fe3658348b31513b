//! Ripple-Crawl main entry point
//!
//! This is the command-line interface for the Ripple-Crawl web crawler.

use clap::{Parser, ValueEnum};
use ripple_crawl::config::{
    load_config_with_hash, validate_seed, Config, CrawlModel, HandlerKind,
};
use ripple_crawl::crawler::{
    build_blocking_http_client, build_http_client, BlockingHttpFetcher, CooperativeCrawler,
    HtmlParser, HttpFetcher, ParsedPage, ThreadedCrawler,
};
use ripple_crawl::processor::{LinkCountReporter, LogHandler, TextPreview};
use ripple_crawl::{
    CrawlError, CrawlReport, CrawlSettings, FetchResult, Handler, LocalProcessor,
    ThreadedProcessor,
};
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Ripple-Crawl: a bounded-concurrency web crawler
///
/// Ripple-Crawl crawls a site breadth-first from a seed URL, up to a depth
/// and a page budget, and runs a built-in handler on every fetched page.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version)]
#[command(about = "A bounded-concurrency web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Crawl from this URL instead of the configured seed
    #[arg(long, value_name = "URL")]
    seed: Option<String>,

    /// Override the configured scheduling model
    #[arg(long, value_enum)]
    model: Option<ModelArg>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Threaded,
    Cooperative,
}

impl From<ModelArg> for CrawlModel {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Threaded => CrawlModel::Threaded,
            ModelArg::Cooperative => CrawlModel::Cooperative,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(seed) = cli.seed {
        validate_seed(&seed)?;
        config.crawler.seed = seed;
    }
    if let Some(model) = cli.model {
        config.crawler.model = model.into();
    }

    if cli.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    let report = match config.crawler.model {
        CrawlModel::Threaded => match config.processor.handler {
            HandlerKind::LinkCount => run_threaded(&config, LinkCountReporter)?,
            HandlerKind::TextPreview => run_threaded(&config, TextPreview::new())?,
            HandlerKind::Log => run_threaded(&config, LogHandler)?,
        },
        CrawlModel::Cooperative => match config.processor.handler {
            HandlerKind::LinkCount => run_cooperative(&config, LinkCountReporter)?,
            HandlerKind::TextPreview => run_cooperative(&config, TextPreview::new())?,
            HandlerKind::Log => run_cooperative(&config, LogHandler)?,
        },
    };

    tracing::info!(
        "Processed {} pages ({} handler failures)",
        report.processor.processed,
        report.processor.failed
    );
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr; stdout is left to handlers such as `text-preview`.
fn setup_logging(verbose: u8, quiet: bool) {
    build_subscriber(log_filter(verbose, quiet), std::io::stderr).init();
}

fn log_filter(verbose: u8, quiet: bool) -> EnvFilter {
    if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawl=info,warn"),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    }
}

fn build_subscriber<W>(filter: EnvFilter, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .finish()
}

/// Handles the --dry-run mode: shows what would be crawled
fn print_dry_run(config: &Config) {
    println!("=== Ripple-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Seed: {}", config.crawler.seed);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Spider workers: {}", config.crawler.spider_workers);
    println!("  Model: {}", config.crawler.model);
    match config.crawler.timeout_secs {
        Some(secs) => println!("  Timeout: {}s", secs),
        None => println!("  Timeout: none"),
    }

    println!("\nProcessor:");
    println!("  Workers: {}", config.processor.workers);
    println!("  Handler: {}", config.processor.handler);

    println!("\nHTTP:");
    println!("  Request timeout: {}s", config.http.request_timeout_secs);
    println!("  Connect timeout: {}s", config.http.connect_timeout_secs);
    println!("  User agent: {}", config.user_agent.user_agent());

    println!("\n✓ Configuration is valid");
}

/// Runs the crawl on OS threads with a pooled blocking HTTP client
fn run_threaded<H>(config: &Config, handler: H) -> Result<CrawlReport, CrawlError>
where
    H: Handler<FetchResult<ParsedPage>>,
{
    let client = build_blocking_http_client(&config.user_agent, &config.http)?;
    let processor = ThreadedProcessor::new(handler, config.processor.workers);

    ThreadedCrawler::new(
        BlockingHttpFetcher::new(client),
        HtmlParser,
        CrawlSettings::from(&config.crawler),
    )
    .crawl(&config.crawler.seed, processor)
}

/// Runs the crawl as tasks on a single-threaded tokio runtime
fn run_cooperative<H>(config: &Config, handler: H) -> Result<CrawlReport, CrawlError>
where
    H: Handler<FetchResult<ParsedPage>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CrawlError::Runtime(format!("Failed to build tokio runtime: {}", e)))?;

    runtime.block_on(async {
        let client = build_http_client(&config.user_agent, &config.http)?;
        let processor = LocalProcessor::new(handler, config.processor.workers);

        CooperativeCrawler::new(
            HttpFetcher::new(client),
            HtmlParser,
            CrawlSettings::from(&config.crawler),
        )
        .crawl(&config.crawler.seed, processor)
        .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logs_go_to_configured_writer() {
        let buffer = SharedBuffer::default();
        let subscriber = build_subscriber(log_filter(0, false), {
            let buffer = buffer.clone();
            move || buffer.clone()
        });

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("crawl started");
            tracing::debug!("hidden at default verbosity");
        });

        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("crawl started"));
        assert!(!logged.contains("hidden at default verbosity"));
    }

    #[test]
    fn test_quiet_only_logs_errors() {
        let buffer = SharedBuffer::default();
        let subscriber = build_subscriber(log_filter(3, true), {
            let buffer = buffer.clone();
            move || buffer.clone()
        });

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("suppressed");
            tracing::error!("fatal");
        });

        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("fatal"));
        assert!(!logged.contains("suppressed"));
    }
}
