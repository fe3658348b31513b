//! Processing stage on OS threads

use super::{run_job, run_setup, run_teardown, Handler, ProcessorReport, StageStats};
use crate::queue::{BlockingQueue, Message, Tombstone};
use crate::telemetry::{Telemetry, TracingTelemetry};
use crate::{CrawlError, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Fixed-size pool of named worker threads running one [`Handler`]
///
/// Items may be accepted before [`start`](Self::start); they wait in the
/// queue until a worker is running.
pub struct ThreadedProcessor<T, H> {
    queue: BlockingQueue<T>,
    handler: Arc<H>,
    workers: usize,
    threads: Vec<JoinHandle<()>>,
    stats: Arc<StageStats>,
    telemetry: Arc<dyn Telemetry>,
}

/// Cloneable handle for submitting items to a [`ThreadedProcessor`]
pub struct ThreadedSink<T> {
    queue: BlockingQueue<T>,
}

impl<T> Clone for ThreadedSink<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T> ThreadedSink<T> {
    /// Enqueues an item without blocking
    pub fn accept(&self, item: T) {
        self.queue.put(item);
    }
}

impl<T, H> ThreadedProcessor<T, H>
where
    T: Send + 'static,
    H: Handler<T>,
{
    /// Creates a stopped pool of `workers` threads
    ///
    /// A worker count of zero is raised to one.
    pub fn new(handler: H, workers: usize) -> Self {
        if workers == 0 {
            tracing::warn!("Processor worker count of 0 raised to 1");
        }

        Self {
            queue: BlockingQueue::new(),
            handler: Arc::new(handler),
            workers: workers.max(1),
            threads: Vec::new(),
            stats: Arc::new(StageStats::default()),
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

    pub fn sink(&self) -> ThreadedSink<T> {
        ThreadedSink {
            queue: self.queue.clone(),
        }
    }

    /// Enqueues an item without blocking
    pub fn accept(&self, item: T) {
        self.queue.put(item);
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Launches the worker threads; calling it twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::WorkerSpawn` if the OS refuses a thread. Workers
    /// already launched keep running and are stopped by `shutdown`.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        for index in 0..self.workers {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let stats = Arc::clone(&self.stats);
            let telemetry = Arc::clone(&self.telemetry);

            let handle = thread::Builder::new()
                .name(format!("processor-{}", index))
                .spawn(move || worker_loop(index, &queue, &*handler, &stats, &*telemetry))
                .map_err(|source| CrawlError::WorkerSpawn {
                    role: "processor",
                    index,
                    source,
                })?;
            self.threads.push(handle);
        }

        tracing::debug!("Started {} processor workers", self.workers);
        Ok(())
    }

    /// Drains the queue, stops every worker and reports the totals
    ///
    /// Blocks until every accepted item has been handed to the handler, then
    /// sends one tombstone per worker and joins them all. A pool that was
    /// never started is started first so that accepted items are not lost.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::WorkerPanicked` for the first worker that died
    /// outside of a handler call. All workers are joined regardless.
    pub fn shutdown(mut self) -> Result<ProcessorReport> {
        self.start()?;

        self.queue.wait_drained();
        let threads = std::mem::take(&mut self.threads);
        for _ in &threads {
            self.queue.put_tombstone(Tombstone::new());
        }

        let joined = join_all(threads);
        let report = self.stats.report();
        tracing::debug!(
            "Processor stopped: {} processed, {} failed",
            report.processed,
            report.failed
        );
        joined.map(|_| report)
    }

    /// Stops the workers without draining
    ///
    /// Items still queued are dropped; an item already being handled is
    /// allowed to finish.
    pub fn abort(mut self) -> ProcessorReport {
        self.queue.close();
        let threads = std::mem::take(&mut self.threads);
        if let Err(error) = join_all(threads) {
            tracing::warn!("{}", error);
        }

        let report = self.stats.report();
        tracing::warn!(
            "Processor aborted: {} processed, {} failed, {} dropped",
            report.processed,
            report.failed,
            self.queue.pending().saturating_sub(self.queue.in_flight())
        );
        report
    }
}

impl<T, H> Drop for ThreadedProcessor<T, H> {
    fn drop(&mut self) {
        // Release workers still blocked in `get` if neither shutdown path ran
        if !self.threads.is_empty() {
            self.queue.close();
        }
    }
}

fn worker_loop<T, H: Handler<T>>(
    index: usize,
    queue: &BlockingQueue<T>,
    handler: &H,
    stats: &StageStats,
    telemetry: &dyn Telemetry,
) {
    let mut context = run_setup(handler, index, telemetry);

    loop {
        let item = match queue.get() {
            Message::Job(item) => item,
            Message::Tombstone(_) => break,
        };

        let _done = queue.done_guard();
        let outcome = run_job(handler, item, context.as_mut(), index, telemetry);
        stats.record(outcome);
    }

    run_teardown(handler, context, index, telemetry);
    tracing::trace!("Processor worker {} exited", index);
}

fn join_all(threads: Vec<JoinHandle<()>>) -> Result<()> {
    let mut first_error = None;
    for (index, handle) in threads.into_iter().enumerate() {
        if handle.join().is_err() && first_error.is_none() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Lifecycle;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_every_item_handled_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = Arc::clone(&seen);
            move |item: u32| -> anyhow::Result<()> {
                seen.lock().unwrap().push(item);
                Ok(())
            }
        };

        let mut processor = ThreadedProcessor::new(handler, 4);
        processor.start().unwrap();
        for i in 0..200 {
            processor.accept(i);
        }

        let report = processor.shutdown().unwrap();
        assert_eq!(report.processed, 200);
        assert_eq!(report.failed, 0);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_setup_and_teardown_once_per_worker() {
        let setups = Arc::new(Mutex::new(0));
        let teardowns = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let setups = Arc::clone(&setups);
            let teardowns = Arc::clone(&teardowns);
            Lifecycle::new(
                move || {
                    *setups.lock().unwrap() += 1;
                    0_usize
                },
                |_item: u32, count: &mut usize| -> anyhow::Result<()> {
                    *count += 1;
                    Ok(())
                },
            )
            .on_teardown(move |count: usize| teardowns.lock().unwrap().push(count))
        };

        let processor = ThreadedProcessor::new(handler, 3);
        for i in 0..30 {
            processor.accept(i);
        }
        let report = processor.shutdown().unwrap();

        assert_eq!(report.processed, 30);
        assert_eq!(*setups.lock().unwrap(), 3);
        let teardowns = teardowns.lock().unwrap();
        assert_eq!(teardowns.len(), 3);
        assert_eq!(teardowns.iter().sum::<usize>(), 30);
    }

    #[test]
    fn test_failures_do_not_stop_pool() {
        let handler = |item: u32| -> anyhow::Result<()> {
            match item % 3 {
                0 => Ok(()),
                1 => anyhow::bail!("item {} rejected", item),
                _ => panic!("item {} exploded", item),
            }
        };

        let processor = ThreadedProcessor::new(handler, 2);
        for i in 0..30 {
            processor.accept(i);
        }

        let report = processor.shutdown().unwrap();
        assert_eq!(report.processed, 10);
        assert_eq!(report.failed, 20);
    }

    #[test]
    fn test_sink_accepts_from_other_threads() {
        let handler = |_item: String| -> anyhow::Result<()> { Ok(()) };
        let mut processor = ThreadedProcessor::new(handler, 2);
        processor.start().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let sink = processor.sink();
                thread::spawn(move || {
                    for i in 0..25 {
                        sink.accept(format!("{}-{}", p, i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(processor.shutdown().unwrap().processed, 100);
    }

    #[test]
    fn test_zero_workers_raised_to_one() {
        let handler = |_item: u8| -> anyhow::Result<()> { Ok(()) };
        let processor = ThreadedProcessor::new(handler, 0);
        assert_eq!(processor.workers(), 1);
    }

    #[test]
    fn test_abort_does_not_wait_for_queue() {
        let handler = |_item: u32| -> anyhow::Result<()> {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        };

        let mut processor = ThreadedProcessor::new(handler, 1);
        for i in 0..100 {
            processor.accept(i);
        }
        processor.start().unwrap();
        thread::sleep(Duration::from_millis(10));

        let report = processor.abort();
        assert!(report.total() < 100);
    }
}
