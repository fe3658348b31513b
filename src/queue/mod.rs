//! Completion-tracked work queues
//!
//! A plain "queue is empty" check cannot tell when a crawl is finished,
//! because the consumers of the frontier are also its producers: an empty
//! queue may be refilled a moment later by a worker that is still fetching.
//! Every queue here therefore counts pending work. `put` increments the
//! count, `get` hands an item out without changing it, and `mark_done`
//! decrements it once the item (and everything it fanned out) is handled.
//! The queue is drained only when nothing is queued and nothing is pending.
//!
//! The bookkeeping lives in [`Ledger`] and is shared by two realizations
//! that differ only in how callers wait:
//!
//! - [`BlockingQueue`]: `Mutex` + `Condvar`, for OS-thread workers
//! - [`LocalQueue`]: `RefCell` + `tokio::sync::Notify`, for tasks that share
//!   one thread on a `LocalSet`

mod blocking;
mod local;

pub use blocking::{BlockingQueue, BlockingDoneGuard};
pub use local::{LocalDoneGuard, LocalQueue};

use std::collections::VecDeque;

/// Sentinel that tells exactly one worker to leave its loop
///
/// A fresh tombstone is created for every worker at every shutdown; it is
/// never confused with a real item because it travels in its own
/// [`Message`] variant.
#[derive(Debug, PartialEq, Eq)]
pub struct Tombstone {
    _private: (),
}

impl Tombstone {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for Tombstone {
    fn default() -> Self {
        Self::new()
    }
}

/// What a worker receives from `get`
#[derive(Debug)]
pub enum Message<T> {
    /// A real item; the receiver owes exactly one `mark_done`
    Job(T),
    /// Leave the worker loop; no `mark_done` is owed
    Tombstone(Tombstone),
}

impl<T> Message<T> {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone(_))
    }

    /// Returns the job, or `None` for a tombstone
    pub fn into_job(self) -> Option<T> {
        match self {
            Self::Job(item) => Some(item),
            Self::Tombstone(_) => None,
        }
    }
}

/// Queue contents plus the pending counter
#[derive(Debug)]
pub(crate) struct Ledger<T> {
    messages: VecDeque<Message<T>>,
    queued_jobs: usize,
    pending: usize,
    closed: bool,
}

impl<T> Ledger<T> {
    pub(crate) fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            queued_jobs: 0,
            pending: 0,
            closed: false,
        }
    }

    pub(crate) fn put(&mut self, item: T) {
        self.messages.push_back(Message::Job(item));
        self.queued_jobs += 1;
        self.pending += 1;
    }

    pub(crate) fn put_tombstone(&mut self, tombstone: Tombstone) {
        self.messages.push_back(Message::Tombstone(tombstone));
    }

    /// Removes the next message, if any
    ///
    /// A closed ledger hands out a fresh tombstone to every caller so that
    /// blocked workers leave their loops without draining.
    pub(crate) fn take(&mut self) -> Option<Message<T>> {
        if self.closed {
            return Some(Message::Tombstone(Tombstone::new()));
        }

        let message = self.messages.pop_front()?;
        if !message.is_tombstone() {
            self.queued_jobs -= 1;
        }
        Some(message)
    }

    /// Records that one previously taken job is fully processed
    ///
    /// # Panics
    ///
    /// Panics if no job is outstanding: a `mark_done` without a matching
    /// `get` is a bookkeeping bug in the caller.
    pub(crate) fn mark_done(&mut self) {
        assert!(
            self.pending > self.queued_jobs,
            "mark_done called without a matching get (pending={}, queued={})",
            self.pending,
            self.queued_jobs
        );
        self.pending -= 1;
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Nothing queued and nothing in flight
    pub(crate) fn is_drained(&self) -> bool {
        self.queued_jobs == 0 && self.pending == 0
    }

    /// Whether `wait_drained` callers may return
    pub(crate) fn is_settled(&self) -> bool {
        self.closed || self.is_drained()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.pending - self.queued_jobs
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ledger_is_drained() {
        let ledger: Ledger<u32> = Ledger::new();
        assert!(ledger.is_drained());
        assert!(ledger.is_settled());
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn test_taken_job_keeps_ledger_pending() {
        let mut ledger = Ledger::new();
        ledger.put(1);
        assert!(!ledger.is_drained());

        let message = ledger.take().unwrap();
        assert_eq!(message.into_job(), Some(1));

        // Queue is empty but the job is still in flight
        assert_eq!(ledger.queued(), 0);
        assert_eq!(ledger.in_flight(), 1);
        assert!(!ledger.is_drained());

        ledger.mark_done();
        assert!(ledger.is_drained());
    }

    #[test]
    fn test_fan_out_before_done_keeps_pending() {
        let mut ledger = Ledger::new();
        ledger.put("seed");
        ledger.take();

        // Worker re-enqueues children before finishing the parent
        ledger.put("child-a");
        ledger.put("child-b");
        ledger.mark_done();
        assert!(!ledger.is_drained());
        assert_eq!(ledger.pending(), 2);

        ledger.take();
        ledger.take();
        ledger.mark_done();
        ledger.mark_done();
        assert!(ledger.is_drained());
    }

    #[test]
    fn test_tombstones_do_not_count_as_pending() {
        let mut ledger: Ledger<u32> = Ledger::new();
        ledger.put_tombstone(Tombstone::new());
        ledger.put_tombstone(Tombstone::new());
        assert!(ledger.is_drained());

        assert!(ledger.take().unwrap().is_tombstone());
        assert!(ledger.take().unwrap().is_tombstone());
        assert!(ledger.take().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let mut ledger = Ledger::new();
        ledger.put(1);
        ledger.put(2);
        ledger.put_tombstone(Tombstone::new());
        ledger.put(3);

        assert_eq!(ledger.take().unwrap().into_job(), Some(1));
        assert_eq!(ledger.take().unwrap().into_job(), Some(2));
        assert!(ledger.take().unwrap().is_tombstone());
        assert_eq!(ledger.take().unwrap().into_job(), Some(3));
    }

    #[test]
    fn test_closed_ledger_hands_out_tombstones() {
        let mut ledger = Ledger::new();
        ledger.put(1);
        ledger.close();

        assert!(ledger.is_closed());
        assert!(ledger.is_settled());
        assert!(!ledger.is_drained());
        assert!(ledger.take().unwrap().is_tombstone());
        assert!(ledger.take().unwrap().is_tombstone());
    }

    #[test]
    #[should_panic(expected = "mark_done called without a matching get")]
    fn test_mark_done_without_get_panics() {
        let mut ledger: Ledger<u32> = Ledger::new();
        ledger.mark_done();
    }

    #[test]
    #[should_panic(expected = "mark_done called without a matching get")]
    fn test_mark_done_for_queued_job_panics() {
        let mut ledger = Ledger::new();
        ledger.put(1);
        // The job was never taken, so nothing is in flight
        ledger.mark_done();
    }
}
