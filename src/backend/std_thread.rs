//! Native thread-pool backend

use super::{run_serially, BackendKind, ParallelBackend, ThreadCount};
use crate::core::{run_chunk, ChunkRange, Result, WorkFn};
use crate::pool::{self, ThreadPool};
use std::sync::Arc;

#[derive(Debug)]
enum PoolSource {
    Global,
    Owned(Arc<ThreadPool>),
}

/// Runs chunks as jobs on a [`ThreadPool`] through a proxy.
///
/// Uses the process-wide pool unless built with [`with_pool`](Self::with_pool).
/// If the shared pool cannot be created, chunks run serially on the caller.
#[derive(Debug)]
pub struct StdThreadBackend {
    pool: PoolSource,
    threads: ThreadCount,
}

impl StdThreadBackend {
    /// Backend over the process-wide pool
    pub fn new() -> Self {
        Self {
            pool: PoolSource::Global,
            threads: ThreadCount::default(),
        }
    }

    /// Backend over a caller-provided pool
    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool: PoolSource::Owned(pool),
            threads: ThreadCount::default(),
        }
    }

    fn pool(&self) -> Result<&ThreadPool> {
        match &self.pool {
            PoolSource::Global => pool::instance(),
            PoolSource::Owned(pool) => Ok(pool),
        }
    }
}

impl Default for StdThreadBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelBackend for StdThreadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StdThread
    }

    fn initialize(&self, num_threads: usize) {
        let effective = self
            .threads
            .set(num_threads, self.estimated_default_number_of_threads());
        log::debug!("std_thread backend uses {} threads", effective);
    }

    fn estimated_number_of_threads(&self) -> usize {
        self.threads
            .effective(self.estimated_default_number_of_threads())
    }

    fn estimated_default_number_of_threads(&self) -> usize {
        match &self.pool {
            PoolSource::Owned(pool) => pool.thread_count(),
            PoolSource::Global => num_cpus::get(),
        }
    }

    fn is_parallel_scope(&self) -> bool {
        self.pool().map(|p| p.is_parallel_scope()).unwrap_or(false)
    }

    fn single_thread(&self) -> bool {
        self.pool().map(|p| p.single_thread()).unwrap_or(false)
    }

    fn execute_chunks(&self, range: ChunkRange, work: &WorkFn<'_>) -> Result<()> {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("{}; running {} chunk(s) serially", e, range.len());
                return run_serially(range, work);
            }
        };

        pool.scope(self.estimated_number_of_threads(), |proxy| -> Result<()> {
            for (from, to) in range {
                proxy.submit(move || run_chunk(work, from, to))?;
            }
            Ok(())
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dispatch_for;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[test]
    fn test_owned_pool_runs_chunks_on_workers() {
        let pool = Arc::new(ThreadPool::with_threads(3).expect("Failed to create thread pool"));
        let backend = StdThreadBackend::with_pool(Arc::clone(&pool));
        assert_eq!(backend.estimated_default_number_of_threads(), 3);

        let caller = std::thread::current().id();
        let threads = Mutex::new(HashSet::new());
        dispatch_for(&backend, true, 0, 300, 10, &|_, _| {
            threads.lock().insert(std::thread::current().id());
            Ok(())
        })
        .expect("parallel_for should succeed");

        let threads = threads.into_inner();
        assert!(!threads.contains(&caller));
        assert!(!threads.is_empty() && threads.len() <= 3);
        assert_eq!(pool.total_jobs_processed(), 30);
    }

    #[test]
    fn test_initialize_limits_proxy_size() {
        let pool = Arc::new(ThreadPool::with_threads(4).expect("Failed to create thread pool"));
        let backend = StdThreadBackend::with_pool(Arc::clone(&pool));

        backend.initialize(2);
        assert_eq!(backend.estimated_number_of_threads(), 2);

        let workers = Mutex::new(HashSet::new());
        dispatch_for(&backend, true, 0, 64, 1, &|_, _| {
            workers.lock().insert(std::thread::current().name().map(str::to_string));
            Ok(())
        })
        .expect("parallel_for should succeed");
        assert!(workers.into_inner().len() <= 2);

        backend.initialize(100);
        assert_eq!(backend.estimated_number_of_threads(), 4);
        backend.initialize(0);
        assert_eq!(backend.estimated_number_of_threads(), 4);
    }

    #[test]
    fn test_nested_calls_use_nested_proxies() {
        let pool = Arc::new(ThreadPool::with_threads(2).expect("Failed to create thread pool"));
        let backend = StdThreadBackend::with_pool(Arc::clone(&pool));
        let cells = Mutex::new(vec![0u8; 100]);

        dispatch_for(&backend, true, 0, 10, 1, &|outer, _| {
            assert!(backend.is_parallel_scope());
            dispatch_for(&backend, true, 0, 10, 2, &|from, to| {
                let mut cells = cells.lock();
                for inner in from..to {
                    cells[outer * 10 + inner] += 1;
                }
                Ok(())
            })
        })
        .expect("nested parallel_for should succeed");

        assert!(cells.into_inner().iter().all(|&c| c == 1));
        assert!(!backend.is_parallel_scope());
    }
}
