//! Work-stealing arena backend built on `rayon`

use super::{BackendKind, ParallelBackend, ThreadCount};
use crate::core::{run_chunk, ChunkRange, Result, WorkFn};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::Arc;

std::thread_local! {
    /// Arena slot of the leader of every region whose chunk this thread is
    /// running, innermost last
    static REGIONS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct RegionGuard;

impl RegionGuard {
    fn enter(leader: usize) -> Self {
        REGIONS.with(|regions| regions.borrow_mut().push(leader));
        RegionGuard
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        REGIONS.with(|regions| regions.borrow_mut().pop());
    }
}

/// Backend in the style of `tbb::parallel_for` inside a `task_arena`.
///
/// Without an explicit thread count the global `rayon` pool is used;
/// [`initialize`](ParallelBackend::initialize) with a count builds a
/// dedicated arena of that size.
#[derive(Debug, Default)]
pub struct TbbBackend {
    threads: ThreadCount,
    arena: RwLock<Option<Arc<rayon::ThreadPool>>>,
}

impl TbbBackend {
    /// Create the backend over the global `rayon` pool
    pub fn new() -> Self {
        Self::default()
    }

    fn build_arena(num_threads: usize) -> Option<Arc<rayon::ThreadPool>> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("smp-tbb-{}", index))
            .build()
            .map(Arc::new)
            .map_err(|e| {
                log::warn!(
                    "Cannot build an arena of {} threads, keeping the global pool: {}",
                    num_threads,
                    e
                );
            })
            .ok()
    }
}

impl ParallelBackend for TbbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tbb
    }

    fn initialize(&self, num_threads: usize) {
        let default = self.estimated_default_number_of_threads();
        let mut arena = self.arena.write();
        let effective = self.threads.set(num_threads, default);
        *arena = if num_threads == 0 {
            None
        } else {
            Self::build_arena(effective)
        };
        log::debug!("TBB backend uses an arena of {} threads", effective);
    }

    fn estimated_number_of_threads(&self) -> usize {
        self.threads
            .effective(self.estimated_default_number_of_threads())
    }

    fn estimated_default_number_of_threads(&self) -> usize {
        num_cpus::get()
    }

    fn is_parallel_scope(&self) -> bool {
        REGIONS.with(|regions| !regions.borrow().is_empty())
    }

    fn single_thread(&self) -> bool {
        let leader = REGIONS.with(|regions| regions.borrow().last().copied());
        match (leader, rayon::current_thread_index()) {
            (Some(leader), Some(current)) => leader == current,
            _ => false,
        }
    }

    fn execute_chunks(&self, range: ChunkRange, work: &WorkFn<'_>) -> Result<()> {
        let first_error = Mutex::new(None);

        let run = || {
            // Read inside the arena: `install` moves this closure onto one of
            // its workers. A caller outside every pool is slot 0.
            let leader = rayon::current_thread_index().unwrap_or(0);
            (0..range.len()).into_par_iter().for_each(|index| {
                let _region = RegionGuard::enter(leader);
                if let Some((from, to)) = range.chunk(index) {
                    if let Err(e) = run_chunk(work, from, to) {
                        first_error.lock().get_or_insert(e);
                    }
                }
            });
        };

        let arena = self.arena.read().clone();
        match arena {
            Some(arena) => arena.install(run),
            None => run(),
        }

        first_error.into_inner().map_or(Ok(()), Err)
    }
}
