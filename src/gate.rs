//! Dedup & bounds gate
//!
//! The gate owns the visited set and the page budget. Admitting a URL is a
//! single check-mark-admit step: if the canonical key is unseen and the
//! budget is open, the key is marked visited and counted, and the caller
//! becomes responsible for enqueueing it.
//!
//! [`SharedGate`] serializes that step behind a mutex for OS threads;
//! [`LocalGate`] relies on cooperative scheduling and only exposes
//! synchronous methods, so no suspension point can be placed inside the
//! critical section.

use crate::url::{normalize, UrlKey};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of offering a candidate URL to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newly visited; the caller must enqueue it
    Admitted,
    /// The canonical key was already visited
    Duplicate,
    /// The page budget is closed
    BudgetExhausted,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Visited set plus page budget
#[derive(Debug)]
pub struct DedupGate {
    visited: HashSet<UrlKey>,
    admitted: usize,
    max_pages: usize,
    limit_hit: bool,
}

impl DedupGate {
    pub fn new(max_pages: usize) -> Self {
        Self {
            visited: HashSet::new(),
            admitted: 0,
            max_pages,
            limit_hit: false,
        }
    }

    /// Offers a candidate URL
    ///
    /// Duplicates are reported as such even after the budget closes; any
    /// unseen URL offered to a closed budget is rejected and latches
    /// [`limit_reached`](Self::limit_reached).
    pub fn check(&mut self, candidate_url: &str) -> Admission {
        let key = normalize(candidate_url);

        if self.visited.contains(&key) {
            return Admission::Duplicate;
        }

        if self.is_closed() {
            self.limit_hit = true;
            return Admission::BudgetExhausted;
        }

        self.visited.insert(key);
        self.admitted += 1;
        Admission::Admitted
    }

    /// Offers a candidate URL, returning true if it was admitted
    pub fn admit(&mut self, candidate_url: &str) -> bool {
        self.check(candidate_url).is_admitted()
    }

    /// True once the budget is spent; never reopens
    pub fn is_closed(&self) -> bool {
        self.admitted >= self.max_pages
    }

    /// True once an unseen URL has been turned away by the closed budget
    pub fn limit_reached(&self) -> bool {
        self.limit_hit
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.visited.contains(&normalize(url))
    }
}

/// Gate shared between OS threads
#[derive(Debug, Clone)]
pub struct SharedGate {
    inner: Arc<Mutex<DedupGate>>,
}

impl SharedGate {
    pub fn new(max_pages: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DedupGate::new(max_pages))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupGate> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offers a candidate and, if admitted, runs `on_admit` before the lock
    /// is released
    ///
    /// `on_admit` is where the caller enqueues the URL, so marking visited
    /// and enqueueing are atomic with respect to other workers. It must not
    /// fetch or parse.
    pub fn admit_then(&self, candidate_url: &str, on_admit: impl FnOnce()) -> Admission {
        let mut gate = self.lock();
        let admission = gate.check(candidate_url);
        if admission.is_admitted() {
            on_admit();
        }
        admission
    }

    pub fn admit(&self, candidate_url: &str) -> bool {
        self.lock().admit(candidate_url)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    pub fn limit_reached(&self) -> bool {
        self.lock().limit_reached()
    }

    pub fn admitted(&self) -> usize {
        self.lock().admitted()
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.lock().has_visited(url)
    }
}

/// Gate shared between tasks on one thread
#[derive(Debug, Clone)]
pub struct LocalGate {
    inner: Rc<RefCell<DedupGate>>,
}

impl LocalGate {
    pub fn new(max_pages: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DedupGate::new(max_pages))),
        }
    }

    /// Offers a candidate and, if admitted, runs `on_admit` in the same
    /// non-suspending step
    pub fn admit_then(&self, candidate_url: &str, on_admit: impl FnOnce()) -> Admission {
        let admission = self.inner.borrow_mut().check(candidate_url);
        if admission.is_admitted() {
            on_admit();
        }
        admission
    }

    pub fn admit(&self, candidate_url: &str) -> bool {
        self.inner.borrow_mut().admit(candidate_url)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().is_closed()
    }

    pub fn limit_reached(&self) -> bool {
        self.inner.borrow().limit_reached()
    }

    pub fn admitted(&self) -> usize {
        self.inner.borrow().admitted()
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.inner.borrow().has_visited(url)
    }
}
