//! Thread-backed completion-tracked queue

use super::{Ledger, Message, Tombstone};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct Shared<T> {
    ledger: Mutex<Ledger<T>>,
    /// Signalled when a message is pushed or the queue is closed
    available: Condvar,
    /// Signalled when the ledger becomes settled
    settled: Condvar,
}

/// Unbounded completion-tracked queue for OS-thread workers
///
/// Cloning is cheap and every clone refers to the same queue.
pub struct BlockingQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger: Mutex::new(Ledger::new()),
                available: Condvar::new(),
                settled: Condvar::new(),
            }),
        }
    }

    // A worker that panicked while holding the lock has already been
    // reported; the ledger itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, Ledger<T>> {
        self.shared
            .ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues an item and counts it as pending; never blocks
    pub fn put(&self, item: T) {
        self.lock().put(item);
        self.shared.available.notify_one();
    }

    /// Enqueues a tombstone for one worker
    pub fn put_tombstone(&self, tombstone: Tombstone) {
        self.lock().put_tombstone(tombstone);
        self.shared.available.notify_one();
    }

    /// Blocks the calling thread until a message is available
    pub fn get(&self) -> Message<T> {
        let mut ledger = self.lock();
        loop {
            if let Some(message) = ledger.take() {
                return message;
            }
            ledger = self
                .shared
                .available
                .wait(ledger)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Marks one previously received job as fully processed
    ///
    /// # Panics
    ///
    /// Panics when called without a matching `get`.
    pub fn mark_done(&self) {
        let mut ledger = self.lock();
        ledger.mark_done();
        if ledger.is_settled() {
            self.shared.settled.notify_all();
        }
    }

    /// Returns a guard that calls `mark_done` when dropped
    pub fn done_guard(&self) -> BlockingDoneGuard<'_, T> {
        BlockingDoneGuard { queue: self }
    }

    /// Blocks until nothing is queued and nothing is in flight
    ///
    /// Also returns once the queue has been closed.
    pub fn wait_drained(&self) {
        let ledger = self.lock();
        let _ledger = self
            .shared
            .settled
            .wait_while(ledger, |ledger| !ledger.is_settled())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    /// Like [`wait_drained`](Self::wait_drained) but gives up after `timeout`
    ///
    /// Returns true if the queue settled in time.
    pub fn wait_drained_timeout(&self, timeout: Duration) -> bool {
        let ledger = self.lock();
        let (ledger, _) = self
            .shared
            .settled
            .wait_timeout_while(ledger, timeout, |ledger| !ledger.is_settled())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ledger.is_settled()
    }

    /// Tears the queue down: every current and future `get` receives a
    /// tombstone and `wait_drained` callers are released
    pub fn close(&self) {
        self.lock().close();
        self.shared.available.notify_all();
        self.shared.settled.notify_all();
    }

    pub fn is_drained(&self) -> bool {
        self.lock().is_drained()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    /// Number of items put but not yet marked done
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    /// Number of items handed out by `get` but not yet marked done
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight()
    }
}

/// Calls `mark_done` on drop, including while unwinding
pub struct BlockingDoneGuard<'a, T> {
    queue: &'a BlockingQueue<T>,
}

impl<T> Drop for BlockingDoneGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.mark_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_put_get_done() {
        let queue = BlockingQueue::new();
        queue.put(7);
        assert_eq!(queue.pending(), 1);

        assert_eq!(queue.get().into_job(), Some(7));
        assert_eq!(queue.in_flight(), 1);
        assert!(!queue.is_drained());

        queue.mark_done();
        assert!(queue.is_drained());
        queue.wait_drained();
    }

    #[test]
    fn test_get_blocks_until_put() {
        let queue = BlockingQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.get().into_job())
        };

        thread::sleep(Duration::from_millis(50));
        queue.put("late");
        assert_eq!(consumer.join().unwrap(), Some("late"));
    }

    #[test]
    fn test_wait_drained_blocks_while_job_in_flight() {
        let queue = BlockingQueue::new();
        queue.put(1);
        let job = queue.get();
        assert!(job.into_job().is_some());

        let returned = Arc::new(AtomicBool::new(false));
        let waiter = {
            let queue = queue.clone();
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                queue.wait_drained();
                returned.store(true, Ordering::SeqCst);
            })
        };

        // Queue is empty, but the worker is still "fetching"
        thread::sleep(Duration::from_millis(100));
        assert!(!returned.load(Ordering::SeqCst));

        // The worker fans out one child before finishing
        queue.put(2);
        queue.mark_done();
        thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst));

        assert_eq!(queue.get().into_job(), Some(2));
        queue.mark_done();
        waiter.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_drained_timeout_expires() {
        let queue = BlockingQueue::new();
        queue.put(1);
        assert!(!queue.wait_drained_timeout(Duration::from_millis(30)));
    }

    #[test]
    fn test_tombstone_per_worker() {
        let queue: BlockingQueue<u32> = BlockingQueue::new();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut handled = 0;
                    while let Some(_job) = queue.get().into_job() {
                        handled += 1;
                        queue.mark_done();
                    }
                    handled
                })
            })
            .collect();

        for i in 0..100 {
            queue.put(i);
        }
        queue.wait_drained();
        for _ in 0..4 {
            queue.put_tombstone(Tombstone::new());
        }

        let total: u32 = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_done_guard_marks_done_on_panic() {
        let queue = BlockingQueue::new();
        queue.put(1);

        let worker = {
            let queue = queue.clone();
            thread::spawn(move || {
                let _job = queue.get();
                let _done = queue.done_guard();
                panic!("boom");
            })
        };

        assert!(worker.join().is_err());
        assert!(queue.is_drained());
    }

    #[test]
    fn test_close_releases_blocked_workers() {
        let queue: BlockingQueue<u32> = BlockingQueue::new();
        queue.put(1);
        let _in_flight = queue.get();

        let blocked = {
            let queue = queue.clone();
            thread::spawn(move || queue.get().is_tombstone())
        };
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_drained())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert!(blocked.join().unwrap());
        waiter.join().unwrap();
        assert!(queue.is_closed());
    }
}
