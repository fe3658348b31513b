//! Processing stage on cooperatively scheduled tasks

use super::{job_outcome, skip_job, AsyncHandler, ProcessorReport, StageStats};
use crate::queue::{LocalQueue, Message, Tombstone};
use crate::telemetry::{panic_message, Telemetry, TracingTelemetry};
use crate::{CrawlError, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use tokio::task::{self, JoinHandle};

/// Fixed-size pool of `spawn_local` tasks running one [`AsyncHandler`]
///
/// All workers share the current thread. A worker awaiting inside `handle`
/// frees the thread for the others; a worker also yields after every item so
/// that synchronous handlers cannot starve the crawl's other tasks.
pub struct LocalProcessor<T, H> {
    queue: LocalQueue<T>,
    handler: Rc<H>,
    workers: usize,
    tasks: Vec<JoinHandle<()>>,
    stats: Rc<StageStats>,
    telemetry: Arc<dyn Telemetry>,
}

/// Cloneable handle for submitting items to a [`LocalProcessor`]
pub struct LocalSink<T> {
    queue: LocalQueue<T>,
}

impl<T> Clone for LocalSink<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T> LocalSink<T> {
    /// Enqueues an item; never suspends
    pub fn accept(&self, item: T) {
        self.queue.put(item);
    }
}

impl<T, H> LocalProcessor<T, H>
where
    T: 'static,
    H: AsyncHandler<T>,
{
    /// Creates a stopped pool of `workers` tasks
    ///
    /// A worker count of zero is raised to one.
    pub fn new(handler: H, workers: usize) -> Self {
        if workers == 0 {
            tracing::warn!("Processor worker count of 0 raised to 1");
        }

        Self {
            queue: LocalQueue::new(),
            handler: Rc::new(handler),
            workers: workers.max(1),
            tasks: Vec::new(),
            stats: Rc::new(StageStats::default()),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn sink(&self) -> LocalSink<T> {
        LocalSink {
            queue: self.queue.clone(),
        }
    }

    /// Enqueues an item; never suspends
    pub fn accept(&self, item: T) {
        self.queue.put(item);
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawns the worker tasks; calling it twice is a no-op
    ///
    /// # Panics
    ///
    /// Panics if called outside of a `tokio::task::LocalSet`.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        for index in 0..self.workers {
            let queue = self.queue.clone();
            let handler = Rc::clone(&self.handler);
            let stats = Rc::clone(&self.stats);
            let telemetry = Arc::clone(&self.telemetry);

            self.tasks.push(task::spawn_local(async move {
                worker_task(index, &queue, &*handler, &stats, &*telemetry).await
            }));
        }

        tracing::debug!("Started {} processor tasks", self.workers);
    }

    /// Drains the queue, stops every worker and reports the totals
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::WorkerPanicked` for the first task that died
    /// outside of a handler call. All tasks are awaited regardless.
    pub async fn shutdown(mut self) -> Result<ProcessorReport> {
        self.start();

        self.queue.wait_drained().await;
        let tasks = std::mem::take(&mut self.tasks);
        for _ in &tasks {
            self.queue.put_tombstone(Tombstone::new());
        }

        let joined = join_all(tasks).await;
        let report = self.stats.report();
        tracing::debug!(
            "Processor stopped: {} processed, {} failed",
            report.processed,
            report.failed
        );
        joined.map(|_| report)
    }

    /// Stops the workers without draining; queued items are dropped
    pub async fn abort(mut self) -> ProcessorReport {
        self.queue.close();
        let tasks = std::mem::take(&mut self.tasks);
        if let Err(error) = join_all(tasks).await {
            tracing::warn!("{}", error);
        }

        let report = self.stats.report();
        tracing::warn!(
            "Processor aborted: {} processed, {} failed",
            report.processed,
            report.failed
        );
        report
    }
}

impl<T, H> Drop for LocalProcessor<T, H> {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.queue.close();
        }
    }
}

async fn worker_task<T: 'static, H: AsyncHandler<T>>(
    index: usize,
    queue: &LocalQueue<T>,
    handler: &H,
    stats: &StageStats,
    telemetry: &dyn Telemetry,
) {
    let mut context = match AssertUnwindSafe(AsyncHandler::setup(handler))
        .catch_unwind()
        .await
    {
        Ok(context) => Some(context),
        Err(payload) => {
            telemetry.iteration_panicked("processor setup", index, &panic_message(&*payload));
            None
        }
    };

    loop {
        let item = match queue.get().await {
            Message::Job(item) => item,
            Message::Tombstone(_) => break,
        };

        {
            let _done = queue.done_guard();
            let outcome = match context.as_mut() {
                Some(context) => {
                    let result = AssertUnwindSafe(AsyncHandler::handle(handler, item, context))
                        .catch_unwind()
                        .await;
                    job_outcome(result, index, telemetry)
                }
                None => skip_job(index, telemetry),
            };
            stats.record(outcome);
        }
        task::yield_now().await;
    }

    if let Some(context) = context {
        if let Err(payload) = AssertUnwindSafe(AsyncHandler::teardown(handler, context))
            .catch_unwind()
            .await
        {
            telemetry.iteration_panicked("processor teardown", index, &panic_message(&*payload));
        }
    }
    tracing::trace!("Processor task {} exited", index);
}

async fn join_all(tasks: Vec<JoinHandle<()>>) -> Result<()> {
    let mut first_error = None;
    for (index, handle) in tasks.into_iter().enumerate() {
        if handle.await.is_err() && first_error.is_none() {
            first_error = Some(CrawlError::WorkerPanicked {
                role: "processor",
                index,
            });
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
