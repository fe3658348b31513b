//! Crawl event reporting
//!
//! Components receive a [`Telemetry`] collaborator at construction instead of
//! reaching for process-wide state. The default method bodies log through
//! `tracing`, so [`TracingTelemetry`] is just the trait with nothing
//! overridden; tests plug in recorders.

use crate::crawler::CrawlPhase;
use crate::gate::Admission;
use crate::{FetchError, ParseError};
use std::any::Any;

/// Receiver of crawl events
pub trait Telemetry: Send + Sync {
    fn phase_changed(&self, from: CrawlPhase, to: CrawlPhase) {
        tracing::debug!("Crawl phase: {} -> {}", from, to);
    }

    fn page_admitted(&self, url: &str, depth: u32) {
        tracing::debug!("Admitted {} at depth {}", url, depth);
    }

    fn page_rejected(&self, url: &str, admission: Admission) {
        tracing::trace!("Rejected {}: {:?}", url, admission);
    }

    fn page_fetched(&self, url: &str, depth: u32, links: usize) {
        tracing::debug!("Fetched {} (depth {}, {} links)", url, depth, links);
    }

    fn fetch_failed(&self, url: &str, error: &FetchError) {
        tracing::warn!("Dropping {}: {}", url, error);
    }

    fn parse_failed(&self, url: &str, error: &ParseError) {
        tracing::warn!("Failed to parse {}: {}", url, error);
    }

    fn handler_failed(&self, worker: usize, error: &anyhow::Error) {
        tracing::error!("Processor worker {} failed to handle item: {:#}", worker, error);
    }

    fn iteration_panicked(&self, role: &'static str, worker: usize, message: &str) {
        tracing::error!("{} worker {} panicked: {}", role, worker, message);
    }
}

/// Logs every event with `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {}

/// Extracts a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_panic_message_str() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static message");
    }

    #[test]
    fn test_panic_message_string() {
        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 42");
    }

    #[test]
    fn test_panic_message_other() {
        let payload = panic::catch_unwind(|| panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
