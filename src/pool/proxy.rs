//! Proxies: exclusive-use handles onto a subset of pool threads

use crate::core::job::BoxedJob;
use crate::core::{ClosureJob, Job, Result, ThreadError};
use crate::pool::thread_pool::PoolShared;
use crate::pool::worker::{self, QueuedJob};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One pool thread as seen by a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProxyThread {
    /// Index of the worker in the pool
    pub(crate) worker: usize,
    /// Virtual id assigned when the proxy was allocated
    pub(crate) id: usize,
}

/// Immutable description of a proxy's thread set and ancestry.
///
/// Queued jobs keep an `Arc` to it so a worker can tell which proxy owns
/// the job it is running.
#[derive(Debug)]
pub(crate) struct ProxyScope {
    pub(crate) parent: Option<Arc<ProxyScope>>,
    pub(crate) threads: Vec<ProxyThread>,
}

impl ProxyScope {
    pub(crate) fn top_level(threads: Vec<ProxyThread>) -> Self {
        Self {
            parent: None,
            threads,
        }
    }

    pub(crate) fn nested(parent: Arc<ProxyScope>, threads: Vec<ProxyThread>) -> Self {
        Self {
            parent: Some(parent),
            threads,
        }
    }

    pub(crate) fn holds(&self, worker: usize) -> bool {
        self.threads.iter().any(|t| t.worker == worker)
    }

    /// Returns true if this scope or any ancestor holds `worker`
    pub(crate) fn chain_holds(&self, worker: usize) -> bool {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.holds(worker) {
                return true;
            }
            scope = current.parent.as_deref();
        }
        false
    }

    pub(crate) fn virtual_id_of(&self, worker: usize) -> Option<usize> {
        self.threads
            .iter()
            .find(|t| t.worker == worker)
            .map(|t| t.id)
    }
}

struct ProxyState {
    /// Index into the thread set of the last submission target
    cursor: usize,
    /// Completion signals of jobs sent to other threads
    pending: Vec<Receiver<Result<()>>>,
    /// Jobs submitted since the last `join()`
    outstanding: usize,
}

/// Exclusive-use handle onto a subset of pool threads.
///
/// Jobs are spread round-robin over the proxy's threads and run in LIFO
/// order on each thread. Every submitted job must be waited for with
/// [`join`](Proxy::join) before the proxy is dropped; dropping a proxy with
/// unjoined work aborts the process.
///
/// A proxy allocated from inside a pool job is *nested*: its first thread
/// is the calling thread, and jobs queued there are run by the caller
/// itself during `join()`.
///
/// `'scope` bounds what submitted jobs may borrow. Proxies from
/// [`ThreadPool::allocate_threads`](crate::pool::ThreadPool::allocate_threads)
/// are `'static`; [`ThreadPool::scope`](crate::pool::ThreadPool::scope)
/// hands out proxies whose jobs may borrow from the enclosing stack frame.
pub struct Proxy<'scope> {
    shared: Arc<PoolShared>,
    scope: Arc<ProxyScope>,
    state: Mutex<ProxyState>,
    // Invariant in 'scope, and neither Send nor Sync.
    _marker: PhantomData<(fn(&'scope ()) -> &'scope (), *const ())>,
}

impl<'scope> Proxy<'scope> {
    pub(crate) fn new(shared: Arc<PoolShared>, scope: ProxyScope) -> Self {
        Self {
            shared,
            scope: Arc::new(scope),
            state: Mutex::new(ProxyState {
                cursor: 0,
                pending: Vec::new(),
                outstanding: 0,
            }),
            _marker: PhantomData,
        }
    }

    /// Submit a closure to the next thread of this proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::ShuttingDown`] if the pool is shutting down.
    pub fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        self.submit_job(ClosureJob::new(f))
    }

    /// Submit a job to the next thread of this proxy.
    ///
    /// The target thread advances round-robin before each submission, so
    /// the first job of a fresh proxy lands on its second thread. On a
    /// nested proxy, jobs landing on the calling thread are queued without
    /// waking anyone; the caller runs them during [`join`](Proxy::join).
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::ShuttingDown`] if the pool is shutting down.
    pub fn submit_job<J>(&self, job: J) -> Result<()>
    where
        J: Job + 'scope,
    {
        #[cfg(feature = "tracing")]
        let job = crate::tracing::TracedJob::new(job);
        let job: BoxedJob<'scope> = Box::new(job);
        // SAFETY: only the lifetime bound of the trait object changes. A
        // job never outlives 'scope: `ThreadPool::scope` joins the proxy
        // before returning (also on unwind), dropping an unjoined proxy
        // aborts, and proxies that escape a scope are `Proxy<'static>`,
        // which only accept 'static jobs.
        let job: BoxedJob<'static> =
            unsafe { std::mem::transmute::<BoxedJob<'scope>, BoxedJob<'static>>(job) };

        let mut state = self.state.lock();
        let slot = (state.cursor + 1) % self.scope.threads.len();
        let target = &self.shared.workers[self.scope.threads[slot].worker];
        let local = !self.is_top_level() && slot == 0;

        let mut queue = target.queue.lock();
        if self.shared.is_joining() {
            return Err(ThreadError::shutting_down(self.shared.name.clone()));
        }

        if local {
            queue.push(QueuedJob::new(Arc::clone(&self.scope), job, None));
        } else {
            let (tx, rx) = crossbeam::channel::bounded(1);
            queue.push(QueuedJob::new(Arc::clone(&self.scope), job, Some(tx)));
            state.pending.push(rx);
            target.condvar.notify_one();
        }
        drop(queue);

        state.cursor = slot;
        state.outstanding += 1;
        Ok(())
    }

    /// Block until every job submitted through this proxy has finished.
    ///
    /// A nested proxy first runs, on the calling thread, the jobs it queued
    /// on that thread. Every job is waited for even when some fail; the
    /// first error observed is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a submitted job.
    pub fn join(&self) -> Result<()> {
        let mut first_error = None;
        let mut record = |outcome: Result<()>| {
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        };

        if !self.is_top_level() {
            let local = &self.shared.workers[self.scope.threads[0].worker];
            loop {
                let job = local.queue.lock().take_latest_owned_by(&self.scope);
                match job {
                    Some(job) => record(worker::execute_job(local, job)),
                    None => break,
                }
            }
        }

        let pending = std::mem::take(&mut self.state.lock().pending);
        for rx in pending {
            match rx.recv() {
                Ok(outcome) => record(outcome),
                Err(_) => record(Err(ThreadError::other(
                    "Job was dropped before signalling completion",
                ))),
            }
        }

        self.state.lock().outstanding = 0;
        first_error.map_or(Ok(()), Err)
    }

    /// Returns true if this proxy was not allocated from inside a pool job
    pub fn is_top_level(&self) -> bool {
        self.scope.parent.is_none()
    }

    /// Number of threads held by this proxy
    pub fn thread_count(&self) -> usize {
        self.scope.threads.len()
    }

    /// Pool worker indices held by this proxy, calling thread first when nested
    pub fn worker_indices(&self) -> Vec<usize> {
        self.scope.threads.iter().map(|t| t.worker).collect()
    }

    /// Virtual ids assigned to this proxy's threads, in the same order
    pub fn virtual_ids(&self) -> Vec<usize> {
        self.scope.threads.iter().map(|t| t.id).collect()
    }

    pub(crate) fn has_outstanding(&self) -> bool {
        self.state.lock().outstanding > 0
    }
}

impl fmt::Debug for Proxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("pool", &self.shared.name)
            .field("top_level", &self.is_top_level())
            .field("workers", &self.worker_indices())
            .finish()
    }
}

impl Drop for Proxy<'_> {
    fn drop(&mut self) {
        let outstanding = self.state.get_mut().outstanding;
        if outstanding > 0 {
            log::error!(
                "Proxy on pool '{}' dropped with {} unjoined job(s); aborting",
                self.shared.name,
                outstanding
            );
            std::process::abort();
        }
    }
}
