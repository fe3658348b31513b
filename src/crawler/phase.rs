//! Crawl phase state machine

use crate::telemetry::Telemetry;
use crate::{CrawlError, Result};
use std::fmt;
use std::sync::Arc;

/// Where an orchestrator is in its lifecycle
///
/// The graceful path is `Idle -> Seeded -> Draining -> SpiderShutdown ->
/// ProcessorShutdown -> Done`. A crawl with a deadline may instead go
/// `Draining -> Aborted -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    Idle,
    Seeded,
    Draining,
    SpiderShutdown,
    ProcessorShutdown,
    Aborted,
    Done,
}

impl CrawlPhase {
    pub fn can_advance_to(self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        matches!(
            (self, next),
            (Idle, Seeded)
                | (Seeded, Draining)
                | (Draining, SpiderShutdown)
                | (Draining, Aborted)
                | (SpiderShutdown, ProcessorShutdown)
                | (ProcessorShutdown, Done)
                | (Aborted, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CrawlPhase::Done
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Seeded => "seeded",
            Self::Draining => "draining",
            Self::SpiderShutdown => "spider-shutdown",
            Self::ProcessorShutdown => "processor-shutdown",
            Self::Aborted => "aborted",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Current phase plus the telemetry sink that hears about transitions
pub(crate) struct PhaseTracker {
    current: CrawlPhase,
    telemetry: Arc<dyn Telemetry>,
}

impl PhaseTracker {
    pub(crate) fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            current: CrawlPhase::Idle,
            telemetry,
        }
    }

    pub(crate) fn current(&self) -> CrawlPhase {
        self.current
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow
    pub(crate) fn advance(&mut self, next: CrawlPhase) -> Result<()> {
        if !self.current.can_advance_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }

        self.telemetry.phase_changed(self.current, next);
        self.current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TracingTelemetry;

    #[test]
    fn test_graceful_path() {
        let mut tracker = PhaseTracker::new(Arc::new(TracingTelemetry));
        for next in [
            CrawlPhase::Seeded,
            CrawlPhase::Draining,
            CrawlPhase::SpiderShutdown,
            CrawlPhase::ProcessorShutdown,
            CrawlPhase::Done,
        ] {
            tracker.advance(next).unwrap();
        }
        assert!(tracker.current().is_terminal());
    }

    #[test]
    fn test_abort_path() {
        let mut tracker = PhaseTracker::new(Arc::new(TracingTelemetry));
        tracker.advance(CrawlPhase::Seeded).unwrap();
        tracker.advance(CrawlPhase::Draining).unwrap();
        tracker.advance(CrawlPhase::Aborted).unwrap();
        tracker.advance(CrawlPhase::Done).unwrap();
        assert_eq!(tracker.current(), CrawlPhase::Done);
    }

    #[test]
    fn test_processor_cannot_stop_before_spiders() {
        let mut tracker = PhaseTracker::new(Arc::new(TracingTelemetry));
        tracker.advance(CrawlPhase::Seeded).unwrap();
        tracker.advance(CrawlPhase::Draining).unwrap();

        let err = tracker.advance(CrawlPhase::ProcessorShutdown).unwrap_err();
        assert!(matches!(
            err,
            CrawlError::InvalidTransition {
                from: CrawlPhase::Draining,
                to: CrawlPhase::ProcessorShutdown,
            }
        ));
        assert_eq!(tracker.current(), CrawlPhase::Draining);
    }

    #[test]
    fn test_abort_only_from_draining() {
        assert!(!CrawlPhase::Seeded.can_advance_to(CrawlPhase::Aborted));
        assert!(!CrawlPhase::SpiderShutdown.can_advance_to(CrawlPhase::Aborted));
        assert!(!CrawlPhase::Done.can_advance_to(CrawlPhase::Idle));
    }

    #[test]
    fn test_display() {
        assert_eq!(CrawlPhase::SpiderShutdown.to_string(), "spider-shutdown");
    }
}
