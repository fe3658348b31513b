//! Processing stage: a content-agnostic pool of consumers
//!
//! A processing stage is built from a [`Handler`] and a worker count. Each
//! worker runs `setup`, then loops over its completion-tracked queue
//! invoking `handle` once per item, then runs `teardown`. `shutdown` waits
//! for the queue to drain, sends one tombstone per worker and joins them.
//!
//! Two realizations share the bookkeeping and the per-item step:
//!
//! - [`ThreadedProcessor`]: one named OS thread per worker, running a
//!   synchronous [`Handler`]
//! - [`LocalProcessor`]: one `spawn_local` task per worker, all on the
//!   current thread's `LocalSet`, running an [`AsyncHandler`]. Every
//!   [`Handler`] is also an [`AsyncHandler`], so the built-in handlers run
//!   in either pool.
//!
//! A failing or panicking `handle` call is reported and counted; it never
//! stops the worker or the pool.

pub mod handlers;
mod local;
mod threaded;

pub use handlers::{LinkCountReporter, LogHandler, TextPreview};
pub use local::{LocalProcessor, LocalSink};
pub use threaded::{ThreadedProcessor, ThreadedSink};

use crate::telemetry::{panic_message, Telemetry};
use async_trait::async_trait;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Business logic run by the processing stage
///
/// `setup` runs once per worker before its loop and its result is passed to
/// every `handle` call of that worker; `teardown` receives it back once the
/// loop ends. Plain closures `Fn(T) -> anyhow::Result<()>` are handlers
/// with no setup or teardown.
pub trait Handler<T>: Send + Sync + 'static {
    /// Per-worker state produced by `setup`
    type Context: 'static;

    fn setup(&self) -> Self::Context;

    fn handle(&self, item: T, context: &mut Self::Context) -> anyhow::Result<()>;

    fn teardown(&self, _context: Self::Context) {}
}

/// Business logic run by the cooperative processing stage
///
/// Same lifecycle as [`Handler`], but every step may await. A worker
/// suspended inside `handle` lets the other workers and the spiders run, so
/// `M` workers keep up to `M` handler calls in flight on one thread. There
/// is no `Send` bound; handlers may hold `Rc` state.
#[async_trait(?Send)]
pub trait AsyncHandler<T: 'static>: 'static {
    /// Per-worker state produced by `setup`
    type Context: 'static;

    async fn setup(&self) -> Self::Context;

    async fn handle(&self, item: T, context: &mut Self::Context) -> anyhow::Result<()>;

    async fn teardown(&self, _context: Self::Context) {}
}

#[async_trait(?Send)]
impl<T, H> AsyncHandler<T> for H
where
    T: 'static,
    H: Handler<T>,
{
    type Context = <H as Handler<T>>::Context;

    async fn setup(&self) -> Self::Context {
        Handler::setup(self)
    }

    async fn handle(&self, item: T, context: &mut Self::Context) -> anyhow::Result<()> {
        Handler::handle(self, item, context)
    }

    async fn teardown(&self, context: Self::Context) {
        Handler::teardown(self, context)
    }
}

impl<T, F> Handler<T> for F
where
    F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    type Context = ();

    fn setup(&self) -> Self::Context {}

    fn handle(&self, item: T, _context: &mut Self::Context) -> anyhow::Result<()> {
        self(item)
    }
}

type Teardown<C> = Box<dyn Fn(C) + Send + Sync>;

/// Handler assembled from a setup function, a handle function and an
/// optional teardown function
///
/// ```
/// use ripple_crawl::processor::{Handler, Lifecycle};
///
/// let handler = Lifecycle::new(
///     Vec::new,
///     |item: u32, seen: &mut Vec<u32>| -> anyhow::Result<()> {
///         seen.push(item);
///         Ok(())
///     },
/// )
/// .on_teardown(|seen: Vec<u32>| println!("worker saw {} items", seen.len()));
///
/// let mut context = handler.setup();
/// handler.handle(3, &mut context).unwrap();
/// handler.teardown(context);
/// ```
pub struct Lifecycle<C, S, H> {
    setup: S,
    handle: H,
    teardown: Option<Teardown<C>>,
}

impl<C, S, H> Lifecycle<C, S, H>
where
    S: Fn() -> C,
{
    pub fn new(setup: S, handle: H) -> Self {
        Self {
            setup,
            handle,
            teardown: None,
        }
    }

    pub fn on_teardown(mut self, teardown: impl Fn(C) + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

impl<T, C, S, H> Handler<T> for Lifecycle<C, S, H>
where
    C: 'static,
    S: Fn() -> C + Send + Sync + 'static,
    H: Fn(T, &mut C) -> anyhow::Result<()> + Send + Sync + 'static,
{
    type Context = C;

    fn setup(&self) -> C {
        (self.setup)()
    }

    fn handle(&self, item: T, context: &mut C) -> anyhow::Result<()> {
        (self.handle)(item, context)
    }

    fn teardown(&self, context: C) {
        if let Some(teardown) = &self.teardown {
            teardown(context);
        }
    }
}

/// Totals reported when a processing stage shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorReport {
    /// Items whose handler returned `Ok`
    pub processed: usize,
    /// Items whose handler failed, panicked or never ran
    pub failed: usize,
}

impl ProcessorReport {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

#[derive(Debug, Default)]
pub(crate) struct StageStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl StageStats {
    pub(crate) fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Handled => &self.processed,
            JobOutcome::Failed | JobOutcome::Panicked | JobOutcome::Skipped => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn report(&self) -> ProcessorReport {
        ProcessorReport {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Handled,
    Failed,
    Panicked,
    /// The worker's setup panicked, so the item was consumed unhandled
    Skipped,
}

/// Runs `setup`, catching a panic so the worker can keep consuming
pub(crate) fn run_setup<T, H: Handler<T>>(
    handler: &H,
    worker: usize,
    telemetry: &dyn Telemetry,
) -> Option<H::Context> {
    match panic::catch_unwind(AssertUnwindSafe(|| Handler::setup(handler))) {
        Ok(context) => Some(context),
        Err(payload) => {
            telemetry.iteration_panicked("processor setup", worker, &panic_message(&*payload));
            None
        }
    }
}

/// Invokes a synchronous handler for one item
pub(crate) fn run_job<T, H: Handler<T>>(
    handler: &H,
    item: T,
    context: Option<&mut H::Context>,
    worker: usize,
    telemetry: &dyn Telemetry,
) -> JobOutcome {
    let Some(context) = context else {
        return skip_job(worker, telemetry);
    };

    let result =
        panic::catch_unwind(AssertUnwindSafe(|| Handler::handle(handler, item, context)));
    job_outcome(result, worker, telemetry)
}

/// Reports an item consumed by a worker whose setup failed
pub(crate) fn skip_job(worker: usize, telemetry: &dyn Telemetry) -> JobOutcome {
    telemetry.handler_failed(
        worker,
        &anyhow::anyhow!("worker setup failed; item dropped"),
    );
    JobOutcome::Skipped
}

/// Classifies one handler call, reporting failures and panics
pub(crate) fn job_outcome(
    result: std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>,
    worker: usize,
    telemetry: &dyn Telemetry,
) -> JobOutcome {
    match result {
        Ok(Ok(())) => JobOutcome::Handled,
        Ok(Err(error)) => {
            telemetry.handler_failed(worker, &error);
            JobOutcome::Failed
        }
        Err(payload) => {
            telemetry.iteration_panicked("processor", worker, &panic_message(&*payload));
            JobOutcome::Panicked
        }
    }
}

/// Runs `teardown` if `setup` succeeded, catching a panic
pub(crate) fn run_teardown<T, H: Handler<T>>(
    handler: &H,
    context: Option<H::Context>,
    worker: usize,
    telemetry: &dyn Telemetry,
) {
    let Some(context) = context else {
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| Handler::teardown(handler, context)));
    if let Err(payload) = result {
        telemetry.iteration_panicked("processor teardown", worker, &panic_message(&*payload));
    }
}
