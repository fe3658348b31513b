//! Task-backed completion-tracked queue
//!
//! All users of a [`LocalQueue`] run on one thread (a `tokio::task::LocalSet`),
//! so the ledger needs no lock: it is only touched between suspension points.

use super::{Ledger, Message, Tombstone};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::Notify;

struct Shared<T> {
    ledger: RefCell<Ledger<T>>,
    available: Notify,
    settled: Notify,
}

/// Unbounded completion-tracked queue for cooperatively scheduled tasks
pub struct LocalQueue<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for LocalQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> Default for LocalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LocalQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                ledger: RefCell::new(Ledger::new()),
                available: Notify::new(),
                settled: Notify::new(),
            }),
        }
    }

    /// Enqueues an item and counts it as pending; never suspends
    pub fn put(&self, item: T) {
        self.shared.ledger.borrow_mut().put(item);
        self.shared.available.notify_one();
    }

    /// Enqueues a tombstone for one worker
    pub fn put_tombstone(&self, tombstone: Tombstone) {
        self.shared.ledger.borrow_mut().put_tombstone(tombstone);
        self.shared.available.notify_one();
    }

    /// Suspends the calling task until a message is available
    pub async fn get(&self) -> Message<T> {
        loop {
            let notified = self.shared.available.notified();
            if let Some(message) = self.shared.ledger.borrow_mut().take() {
                return message;
            }
            notified.await;
        }
    }

    /// Marks one previously received job as fully processed
    ///
    /// # Panics
    ///
    /// Panics when called without a matching `get`.
    pub fn mark_done(&self) {
        let settled = {
            let mut ledger = self.shared.ledger.borrow_mut();
            ledger.mark_done();
            ledger.is_settled()
        };
        if settled {
            self.shared.settled.notify_waiters();
        }
    }

    /// Returns a guard that calls `mark_done` when dropped
    ///
    /// Dropping also happens when the owning task is cancelled mid-fetch.
    pub fn done_guard(&self) -> LocalDoneGuard<'_, T> {
        LocalDoneGuard { queue: self }
    }

    /// Suspends until nothing is queued and nothing is in flight
    ///
    /// Also returns once the queue has been closed.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.shared.settled.notified();
            if self.shared.ledger.borrow().is_settled() {
                return;
            }
            notified.await;
        }
    }

    /// Tears the queue down: every current and future `get` receives a
    /// tombstone and `wait_drained` callers are released
    pub fn close(&self) {
        self.shared.ledger.borrow_mut().close();
        self.shared.available.notify_waiters();
        self.shared.settled.notify_waiters();
    }

    pub fn is_drained(&self) -> bool {
        self.shared.ledger.borrow().is_drained()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ledger.borrow().is_closed()
    }

    /// Number of items put but not yet marked done
    pub fn pending(&self) -> usize {
        self.shared.ledger.borrow().pending()
    }

    /// Number of items handed out by `get` but not yet marked done
    pub fn in_flight(&self) -> usize {
        self.shared.ledger.borrow().in_flight()
    }
}

/// Calls `mark_done` on drop
pub struct LocalDoneGuard<'a, T> {
    queue: &'a LocalQueue<T>,
}

impl<T> Drop for LocalDoneGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.mark_done();
    }
}
