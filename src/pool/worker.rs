//! Worker thread implementation

use crate::core::job::{catch_panic, BoxedJob};
use crate::core::{Result, ThreadError};
use crate::pool::proxy::ProxyScope;
use crate::pool::thread_pool::PoolShared;
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Total number of jobs processed
    pub jobs_processed: AtomicU64,
    /// Total number of jobs that failed
    pub jobs_failed: AtomicU64,
    /// Total number of jobs that panicked
    pub jobs_panicked: AtomicU64,
    /// Total time spent processing jobs (microseconds)
    pub total_processing_time_us: AtomicU64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment jobs processed counter
    pub fn increment_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment jobs failed counter
    pub fn increment_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment jobs panicked counter
    pub fn increment_panicked(&self) {
        self.jobs_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Add processing time
    pub fn add_processing_time(&self, microseconds: u64) {
        self.total_processing_time_us
            .fetch_add(microseconds, Ordering::Relaxed);
    }

    /// Get total jobs processed
    pub fn get_jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get total jobs failed
    pub fn get_jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get total jobs panicked
    pub fn get_jobs_panicked(&self) -> u64 {
        self.jobs_panicked.load(Ordering::Relaxed)
    }

    /// Get average processing time per job in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.jobs_processed.load(Ordering::Relaxed)
            + self.jobs_failed.load(Ordering::Relaxed)
            + self.jobs_panicked.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Take a plain copy of the counters
    pub fn snapshot(&self, worker_index: usize) -> WorkerStatSnapshot {
        WorkerStatSnapshot {
            worker_index,
            jobs_processed: self.get_jobs_processed(),
            jobs_failed: self.get_jobs_failed(),
            jobs_panicked: self.get_jobs_panicked(),
            total_processing_time_us: self.total_processing_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatSnapshot {
    /// Index of the worker in the pool
    pub worker_index: usize,
    /// Jobs that returned `Ok`
    pub jobs_processed: u64,
    /// Jobs that returned `Err`
    pub jobs_failed: u64,
    /// Jobs that panicked
    pub jobs_panicked: u64,
    /// Time spent running jobs (microseconds)
    pub total_processing_time_us: u64,
}

/// A job waiting in a worker queue, tagged with the proxy that submitted it.
///
/// `owner` is read-only and only used to find this proxy's jobs during a
/// nested `join()` and to answer thread-id queries while the job runs.
pub(crate) struct QueuedJob {
    pub(crate) owner: Arc<ProxyScope>,
    job: BoxedJob<'static>,
    completion: Option<Sender<Result<()>>>,
}

impl QueuedJob {
    pub(crate) fn new(
        owner: Arc<ProxyScope>,
        job: BoxedJob<'static>,
        completion: Option<Sender<Result<()>>>,
    ) -> Self {
        Self {
            owner,
            job,
            completion,
        }
    }
}

/// Per-worker job queue.
///
/// Execution order is LIFO: the most recently queued job runs next, which
/// favours data the submitting thread has just touched. No FIFO guarantee.
#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: Vec<QueuedJob>,
}

impl JobQueue {
    pub(crate) fn push(&mut self, job: QueuedJob) {
        self.jobs.push(job);
    }

    /// Remove the most recently queued job
    pub(crate) fn pop_latest(&mut self) -> Option<QueuedJob> {
        self.jobs.pop()
    }

    /// Remove the most recently queued job submitted through `owner`
    pub(crate) fn take_latest_owned_by(&mut self, owner: &Arc<ProxyScope>) -> Option<QueuedJob> {
        let position = self
            .jobs
            .iter()
            .rposition(|job| Arc::ptr_eq(&job.owner, owner))?;
        Some(self.jobs.remove(position))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// One OS thread of the pool together with its queue
pub(crate) struct WorkerThread {
    pub(crate) index: usize,
    pub(crate) queue: Mutex<JobQueue>,
    pub(crate) condvar: Condvar,
    pub(crate) stats: Arc<WorkerStats>,
}

impl WorkerThread {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            queue: Mutex::new(JobQueue::default()),
            condvar: Condvar::new(),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// Wake the thread while holding its queue lock so the wake-up cannot be lost
    pub(crate) fn wake(&self) {
        let _queue = self.queue.lock();
        self.condvar.notify_all();
    }
}

struct WorkerContext {
    pool_id: usize,
    index: usize,
    running: Vec<Arc<ProxyScope>>,
}

thread_local! {
    static WORKER_CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Index of the calling thread in pool `pool_id`, if it is one of its workers
pub(crate) fn current_worker(pool_id: usize) -> Option<usize> {
    WORKER_CONTEXT.with(|ctx| match &*ctx.borrow() {
        Some(ctx) if ctx.pool_id == pool_id => Some(ctx.index),
        _ => None,
    })
}

/// Worker index and the proxy owning the job the calling thread is running
pub(crate) fn current_job_scope(pool_id: usize) -> Option<(usize, Arc<ProxyScope>)> {
    WORKER_CONTEXT.with(|ctx| match &*ctx.borrow() {
        Some(ctx) if ctx.pool_id == pool_id => ctx
            .running
            .last()
            .map(|scope| (ctx.index, Arc::clone(scope))),
        _ => None,
    })
}

struct RunningGuard;

impl RunningGuard {
    fn enter(scope: &Arc<ProxyScope>) -> Self {
        WORKER_CONTEXT.with(|ctx| {
            if let Some(ctx) = ctx.borrow_mut().as_mut() {
                ctx.running.push(Arc::clone(scope));
            }
        });
        RunningGuard
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        WORKER_CONTEXT.with(|ctx| {
            if let Some(ctx) = ctx.borrow_mut().as_mut() {
                ctx.running.pop();
            }
        });
    }
}

/// Run a dequeued job on the calling worker and signal its completion.
///
/// Failures are logged and counted here; the outcome is also sent to the
/// submitting proxy so `join()` can report it.
pub(crate) fn execute_job(worker: &WorkerThread, job: QueuedJob) -> Result<()> {
    let QueuedJob {
        owner,
        mut job,
        completion,
    } = job;

    #[cfg(feature = "tracing")]
    let job_span = span!(Level::DEBUG, "job_execution", job_type = job.job_type());
    #[cfg(feature = "tracing")]
    let _job_guard = job_span.enter();

    let start = Instant::now();
    let outcome = {
        let _running = RunningGuard::enter(&owner);
        catch_panic(|| job.execute())
    };
    let elapsed = start.elapsed();

    match &outcome {
        Ok(()) => {
            worker.stats.increment_processed();
            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_completion(elapsed, true);
        }
        Err(e @ ThreadError::WorkerPanic { .. }) => {
            log::error!(
                "Worker {}: job '{}' panicked, the worker keeps running: {}",
                worker.index,
                job.job_type(),
                e
            );
            worker.stats.increment_panicked();
            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_panic(elapsed);
        }
        Err(e) => {
            log::warn!(
                "Worker {}: job '{}' failed: {}",
                worker.index,
                job.job_type(),
                e
            );
            worker.stats.increment_failed();
            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_completion(elapsed, false);
        }
    }
    worker.stats.add_processing_time(elapsed.as_micros() as u64);

    // Release the job (and whatever it borrowed) before signalling completion.
    drop(job);

    match completion {
        Some(sender) => {
            // The receiving proxy may have been torn down by an abort already.
            let _ = sender.send(outcome.as_ref().map(|_| ()).map_err(clone_error));
            outcome
        }
        None => outcome,
    }
}

/// Outcome copy handed to the proxy; the worker keeps the original for its caller
fn clone_error(error: &ThreadError) -> ThreadError {
    match error {
        ThreadError::WorkerPanic { thread_id, message } => {
            ThreadError::worker_panic(*thread_id, message.clone())
        }
        ThreadError::ExecutionError {
            first,
            last,
            message,
        } => ThreadError::execution(*first, *last, message.clone()),
        other => ThreadError::other(other.to_string()),
    }
}

/// Main worker loop.
///
/// Blocks until the pool is initialized, then runs the latest queued job
/// until the pool is joining and the queue is empty. Jobs still queued at
/// shutdown are drained first.
pub(crate) fn run(shared: Arc<PoolShared>, index: usize) {
    WORKER_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(WorkerContext {
            pool_id: shared.id,
            index,
            running: Vec::new(),
        });
    });

    let worker = &shared.workers[index];

    #[cfg(feature = "tracing")]
    let worker_span = span!(Level::DEBUG, "worker", id = index);
    #[cfg(feature = "tracing")]
    let _guard = worker_span.enter();

    {
        let mut queue = worker.queue.lock();
        while !shared.is_initialized() && !shared.is_joining() {
            worker.condvar.wait(&mut queue);
        }
    }

    #[cfg(feature = "tracing")]
    debug!("worker started");
    log::debug!("{} worker {} started", shared.name, index);

    loop {
        let job = {
            let mut queue = worker.queue.lock();
            while queue.is_empty() && !shared.is_joining() {
                worker.condvar.wait(&mut queue);
            }
            match queue.pop_latest() {
                Some(job) => job,
                None => break,
            }
        };

        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_worker_busy(index);

        // The outcome was logged and forwarded to the proxy already.
        let _ = execute_job(worker, job);

        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_worker_idle(index);
    }

    #[cfg(feature = "tracing")]
    debug!(
        jobs_processed = worker.stats.get_jobs_processed(),
        jobs_failed = worker.stats.get_jobs_failed(),
        "worker shutting down"
    );
    log::debug!("{} worker {} stopped", shared.name, index);

    WORKER_CONTEXT.with(|ctx| ctx.borrow_mut().take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ClosureJob;

    fn scope() -> Arc<ProxyScope> {
        Arc::new(ProxyScope::top_level(Vec::new()))
    }

    fn job_recording(order: &Arc<Mutex<Vec<usize>>>, value: usize, owner: &Arc<ProxyScope>) -> QueuedJob {
        let order = Arc::clone(order);
        QueuedJob::new(
            Arc::clone(owner),
            Box::new(ClosureJob::new(move || {
                order.lock().push(value);
                Ok(())
            })),
            None,
        )
    }

    #[test]
    fn test_queue_is_lifo() {
        let owner = scope();
        let order = Arc::new(Mutex::new(Vec::new()));
        let worker = WorkerThread::new(0);

        let mut queue = JobQueue::default();
        for value in 0..4 {
            queue.push(job_recording(&order, value, &owner));
        }
        assert_eq!(queue.len(), 4);

        while let Some(job) = queue.pop_latest() {
            execute_job(&worker, job).expect("job should succeed");
        }
        assert_eq!(*order.lock(), vec![3, 2, 1, 0]);
        assert_eq!(worker.stats.get_jobs_processed(), 4);
    }

    #[test]
    fn test_take_latest_owned_by_filters_owner() {
        let mine = scope();
        let theirs = scope();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut queue = JobQueue::default();
        queue.push(job_recording(&order, 1, &mine));
        queue.push(job_recording(&order, 2, &theirs));
        queue.push(job_recording(&order, 3, &mine));
        queue.push(job_recording(&order, 4, &theirs));

        let taken = queue.take_latest_owned_by(&mine).expect("job for owner");
        assert!(Arc::ptr_eq(&taken.owner, &mine));
        let taken_again = queue.take_latest_owned_by(&mine).expect("second job for owner");
        assert!(Arc::ptr_eq(&taken_again.owner, &mine));
        assert!(queue.take_latest_owned_by(&mine).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_execute_job_counts_failures_and_panics() {
        let owner = scope();
        let worker = WorkerThread::new(0);
        let (tx, rx) = crossbeam::channel::bounded(1);

        let failing = QueuedJob::new(
            Arc::clone(&owner),
            Box::new(ClosureJob::new(|| Err(ThreadError::other("nope")))),
            Some(tx),
        );
        assert!(execute_job(&worker, failing).is_err());
        assert!(rx.recv().expect("completion signal").is_err());

        let panicking = QueuedJob::new(
            Arc::clone(&owner),
            Box::new(ClosureJob::new(|| panic!("Intentional panic for testing"))),
            None,
        );
        let err = execute_job(&worker, panicking).unwrap_err();
        assert!(err.is_panic());

        assert_eq!(worker.stats.get_jobs_failed(), 1);
        assert_eq!(worker.stats.get_jobs_panicked(), 1);
        assert_eq!(worker.stats.get_jobs_processed(), 0);
    }

    #[test]
    fn test_stats_snapshot_serializes() {
        let stats = WorkerStats::new();
        stats.increment_processed();
        stats.add_processing_time(40);

        let snapshot = stats.snapshot(2);
        let json = serde_json::to_string(&snapshot).expect("serialize snapshot");
        let back: WorkerStatSnapshot = serde_json::from_str(&json).expect("deserialize snapshot");
        assert_eq!(back, snapshot);
        assert_eq!(stats.get_average_processing_time_us(), 40.0);
    }
}
