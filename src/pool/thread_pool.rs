//! Thread pool implementation

use crate::core::{Result, ThreadError};
use crate::pool::proxy::{Proxy, ProxyScope, ProxyThread};
use crate::pool::worker::{self, WorkerStatSnapshot, WorkerStats, WorkerThread};
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

/// Thread id reported for threads that do not belong to the pool
pub const EXTERNAL_THREAD_ID: usize = 1;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Configuration for thread pool
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads (0 = number of CPUs)
    pub num_threads: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_name_prefix: "smp-worker".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    /// Create a new configuration with specified number of threads
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: if num_threads == 0 {
                num_cpus::get()
            } else {
                num_threads
            },
            ..Default::default()
        }
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(ThreadError::invalid_config(
                "num_threads",
                "Number of threads must be greater than 0",
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ThreadError::invalid_config(
                "thread_name_prefix",
                "Thread name prefix must not be empty",
            ));
        }
        Ok(())
    }
}

/// State shared between the pool, its workers and its proxies
pub(crate) struct PoolShared {
    pub(crate) id: usize,
    pub(crate) name: String,
    pub(crate) workers: Box<[CachePadded<WorkerThread>]>,
    initialized: AtomicBool,
    joining: AtomicBool,
    next_virtual_id: AtomicUsize,
}

impl PoolShared {
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn is_joining(&self) -> bool {
        self.joining.load(Ordering::Acquire)
    }

    /// Allocate a fresh virtual thread id; the first id handed out is 2
    fn next_virtual_id(&self) -> usize {
        self.next_virtual_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn wake_all(&self) {
        for worker in self.workers.iter() {
            worker.wake();
        }
    }
}

/// Fixed-size pool of worker threads handing out [`Proxy`] handles.
///
/// The pool never runs work directly. Callers allocate a proxy holding a
/// subset of threads, submit jobs through it and join it. Allocation from
/// inside a running job yields a nested proxy whose first thread is the
/// caller, so nested parallel regions never wait on a thread that is busy
/// waiting for them.
///
/// Each worker keeps its own LIFO queue; there is no work stealing.
pub struct ThreadPool {
    config: ThreadPoolConfig,
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("config", &self.config)
            .field("id", &self.shared.id)
            .field("joining", &self.shared.is_joining())
            .finish()
    }
}

impl ThreadPool {
    /// Create a thread pool with one worker per hardware thread
    pub fn new() -> Result<Self> {
        Self::with_config(ThreadPoolConfig::default())
    }

    /// Create a thread pool with specified number of threads
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        Self::with_config(ThreadPoolConfig::new(num_threads))
    }

    /// Create a thread pool with custom configuration and start its workers.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::SpawnError`] if a worker cannot be spawned; the
    /// workers already running are stopped and joined first.
    pub fn with_config(config: ThreadPoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: config.thread_name_prefix.clone(),
            workers: (0..config.num_threads)
                .map(|index| CachePadded::new(WorkerThread::new(index)))
                .collect(),
            initialized: AtomicBool::new(false),
            joining: AtomicBool::new(false),
            next_virtual_id: AtomicUsize::new(EXTERNAL_THREAD_ID),
        });

        let mut handles = Vec::with_capacity(config.num_threads);
        for index in 0..config.num_threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, index))
                .spawn(move || worker::run(worker_shared, index));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!(
                        "Failed to spawn worker {} of pool '{}': {}",
                        index,
                        config.thread_name_prefix,
                        e
                    );
                    shared.joining.store(true, Ordering::Release);
                    shared.wake_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(ThreadError::spawn_with_source(
                        index,
                        "Cannot create worker thread",
                        e,
                    ));
                }
            }
        }

        shared.initialized.store(true, Ordering::Release);
        shared.wake_all();

        log::debug!(
            "Thread pool '{}' started with {} workers",
            config.thread_name_prefix,
            config.num_threads
        );
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_pool_start(&config.thread_name_prefix, config.num_threads);

        Ok(Self {
            config,
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Allocate a proxy holding up to `thread_count` threads (0 = all).
    ///
    /// Called from outside the pool this returns a top-level proxy over the
    /// first `thread_count` workers. Called from inside a pool job it
    /// returns a nested proxy: the calling thread first, then threads held
    /// by neither the running job's proxy nor any of its ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::ShuttingDown`] once [`shutdown`](Self::shutdown) was called.
    pub fn allocate_threads(&self, thread_count: usize) -> Result<Proxy<'static>> {
        self.allocate(thread_count)
    }

    /// Allocate a proxy, run `f` with it and join it before returning.
    ///
    /// Jobs submitted inside `f` may borrow from the enclosing stack frame.
    /// The proxy is joined even if `f` panics; the panic is then resumed.
    ///
    /// # Errors
    ///
    /// Returns an allocation error, or the first error reported by a job.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_smp_system::prelude::*;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// # fn main() -> Result<()> {
    /// let pool = ThreadPool::with_threads(2)?;
    /// let counter = AtomicUsize::new(0);
    ///
    /// pool.scope(0, |proxy| {
    ///     for _ in 0..8 {
    ///         proxy.submit(|| {
    ///             counter.fetch_add(1, Ordering::Relaxed);
    ///             Ok(())
    ///         })?;
    ///     }
    ///     Ok::<_, ThreadError>(())
    /// })??;
    ///
    /// assert_eq!(counter.load(Ordering::Relaxed), 8);
    /// # Ok(())
    /// # }
    /// ```
    pub fn scope<'env, F, R>(&self, thread_count: usize, f: F) -> Result<R>
    where
        F: FnOnce(&Proxy<'env>) -> R,
    {
        let proxy: Proxy<'env> = self.allocate(thread_count)?;
        let body = catch_unwind(AssertUnwindSafe(|| f(&proxy)));
        let joined = if proxy.has_outstanding() {
            proxy.join()
        } else {
            Ok(())
        };
        match body {
            Ok(value) => joined.map(|()| value),
            Err(payload) => resume_unwind(payload),
        }
    }

    fn allocate<'scope>(&self, thread_count: usize) -> Result<Proxy<'scope>> {
        if self.shared.is_joining() {
            return Err(ThreadError::shutting_down(self.shared.name.clone()));
        }

        let total = self.shared.workers.len();
        let count = if thread_count == 0 || thread_count > total {
            total
        } else {
            thread_count
        };

        let scope = match worker::current_job_scope(self.shared.id) {
            Some((caller, parent)) => {
                let mut threads = vec![ProxyThread {
                    worker: caller,
                    id: self.shared.next_virtual_id(),
                }];
                self.fill_nested(&parent, caller, count, &mut threads);
                ProxyScope::nested(parent, threads)
            }
            None => ProxyScope::top_level(
                (0..count)
                    .map(|worker| ProxyThread {
                        worker,
                        id: self.shared.next_virtual_id(),
                    })
                    .collect(),
            ),
        };

        log::trace!(
            "Pool '{}' allocated proxy over workers {:?}",
            self.shared.name,
            scope.threads.iter().map(|t| t.worker).collect::<Vec<_>>()
        );
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_proxy_allocated(scope.threads.len(), scope.parent.is_some());

        Ok(Proxy::new(Arc::clone(&self.shared), scope))
    }

    /// Add free threads to a nested proxy until it holds `count` of them
    fn fill_nested(
        &self,
        parent: &ProxyScope,
        caller: usize,
        count: usize,
        threads: &mut Vec<ProxyThread>,
    ) {
        if parent.threads.len() >= self.shared.workers.len() {
            return;
        }
        for worker in 0..self.shared.workers.len() {
            if threads.len() >= count {
                break;
            }
            if worker != caller && !parent.chain_holds(worker) {
                threads.push(ProxyThread {
                    worker,
                    id: self.shared.next_virtual_id(),
                });
            }
        }
    }

    /// Virtual id of the calling thread in the proxy whose job it is running,
    /// or [`EXTERNAL_THREAD_ID`] outside the pool
    pub fn thread_id(&self) -> usize {
        worker::current_job_scope(self.shared.id)
            .and_then(|(index, scope)| scope.virtual_id_of(index))
            .unwrap_or(EXTERNAL_THREAD_ID)
    }

    /// Returns true if the calling thread is one of this pool's workers
    pub fn is_parallel_scope(&self) -> bool {
        worker::current_worker(self.shared.id).is_some()
    }

    /// Returns true if the calling thread is the first thread of the proxy
    /// whose job it is running
    pub fn single_thread(&self) -> bool {
        worker::current_job_scope(self.shared.id)
            .map(|(index, scope)| scope.threads.first().map(|t| t.worker) == Some(index))
            .unwrap_or(false)
    }

    /// Get number of worker threads
    pub fn thread_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Returns true until [`shutdown`](Self::shutdown) is called
    pub fn is_running(&self) -> bool {
        !self.shared.is_joining()
    }

    /// Get the thread name prefix
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get worker statistics
    pub fn get_stats(&self) -> Vec<Arc<WorkerStats>> {
        self.shared
            .workers
            .iter()
            .map(|w| Arc::clone(&w.stats))
            .collect()
    }

    /// Get a serializable copy of every worker's statistics
    pub fn stats_snapshot(&self) -> Vec<WorkerStatSnapshot> {
        self.shared
            .workers
            .iter()
            .map(|w| w.stats.snapshot(w.index))
            .collect()
    }

    /// Get total jobs processed
    pub fn total_jobs_processed(&self) -> u64 {
        self.get_stats().iter().map(|s| s.get_jobs_processed()).sum()
    }

    /// Get total jobs failed
    pub fn total_jobs_failed(&self) -> u64 {
        self.get_stats().iter().map(|s| s.get_jobs_failed()).sum()
    }

    /// Get total jobs panicked
    pub fn total_jobs_panicked(&self) -> u64 {
        self.get_stats().iter().map(|s| s.get_jobs_panicked()).sum()
    }

    /// Stop accepting work, drain the queues and join every worker.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error when called from one of the pool's own workers or
    /// when a worker thread cannot be joined.
    pub fn shutdown(&self) -> Result<()> {
        if self.is_parallel_scope() {
            return Err(ThreadError::other(format!(
                "Thread pool '{}' cannot be shut down from its own worker",
                self.shared.name
            )));
        }

        self.shared.joining.store(true, Ordering::Release);
        self.shared.wake_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return Ok(());
        }
        for (index, handle) in handles.into_iter().enumerate() {
            handle
                .join()
                .map_err(|_| ThreadError::join(index, "Worker panicked"))?;
        }

        log::debug!("Thread pool '{}' shut down", self.shared.name);
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_pool_shutdown(
            &self.shared.name,
            self.total_jobs_processed(),
            self.total_jobs_failed(),
        );
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!(
                "Failed to shutdown thread pool '{}' during drop: {}",
                self.shared.name,
                e
            );
        }
    }
}

static INSTANCE: OnceLock<std::result::Result<ThreadPool, String>> = OnceLock::new();

/// Process-wide pool with one worker per hardware thread, created on first use.
///
/// # Errors
///
/// Returns [`ThreadError::PoolUnavailable`] if the pool could not be created;
/// the failure is cached and reported on every call.
pub fn instance() -> Result<&'static ThreadPool> {
    INSTANCE
        .get_or_init(|| {
            ThreadPool::new().map_err(|e| {
                log::error!("Failed to create the shared thread pool: {}", e);
                e.to_string()
            })
        })
        .as_ref()
        .map_err(|message| ThreadError::pool_unavailable(message.clone()))
}
