//! Fork-join team backend
//!
//! Each parallel region forks a team: the caller becomes member 0 and the
//! other members are scoped threads. Members pull chunks from a shared
//! counter, so faster members take more chunks. Nested regions fork nested
//! teams.

use super::{BackendKind, ParallelBackend, ThreadCount};
use crate::core::{run_chunk, ChunkRange, Result, ThreadError, WorkFn};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

std::thread_local! {
    /// Member numbers of the teams the calling thread belongs to, innermost last
    static TEAM_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct TeamGuard;

impl TeamGuard {
    fn enter(member: usize) -> Self {
        TEAM_STACK.with(|stack| stack.borrow_mut().push(member));
        TeamGuard
    }
}

impl Drop for TeamGuard {
    fn drop(&mut self) {
        TEAM_STACK.with(|stack| stack.borrow_mut().pop());
    }
}

/// Team-based backend in the style of `#pragma omp parallel for schedule(dynamic)`
///
/// Teams are not kept between regions: every region spawns its members as
/// scoped OS threads and joins them before returning. A nested region forks
/// its own team from each outer member, so with nesting enabled one call can
/// start up to `threads * threads` short-lived threads. Prefer
/// [`TbbBackend`](super::TbbBackend) or the pool-based backend for many small
/// nested regions.
#[derive(Debug, Default)]
pub struct OpenMpBackend {
    threads: ThreadCount,
}

impl OpenMpBackend {
    /// Create the backend with the default team size
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParallelBackend for OpenMpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenMp
    }

    fn initialize(&self, num_threads: usize) {
        let effective = self
            .threads
            .set(num_threads, self.estimated_default_number_of_threads());
        log::debug!("OpenMP backend uses teams of {} threads", effective);
    }

    fn estimated_number_of_threads(&self) -> usize {
        self.threads
            .effective(self.estimated_default_number_of_threads())
    }

    fn estimated_default_number_of_threads(&self) -> usize {
        num_cpus::get()
    }

    fn is_parallel_scope(&self) -> bool {
        TEAM_STACK.with(|stack| !stack.borrow().is_empty())
    }

    fn single_thread(&self) -> bool {
        TEAM_STACK.with(|stack| stack.borrow().last() == Some(&0))
    }

    fn execute_chunks(&self, range: ChunkRange, work: &WorkFn<'_>) -> Result<()> {
        let team_size = self.estimated_number_of_threads().min(range.len()).max(1);
        let next_chunk = AtomicUsize::new(0);
        let first_error = Mutex::new(None);

        let member = |number: usize| {
            let _team = TeamGuard::enter(number);
            loop {
                let index = next_chunk.fetch_add(1, Ordering::Relaxed);
                let Some((from, to)) = range.chunk(index) else {
                    break;
                };
                if let Err(e) = run_chunk(work, from, to) {
                    first_error.lock().get_or_insert(e);
                }
            }
        };
        let member = &member;

        crossbeam::thread::scope(|team| {
            for number in 1..team_size {
                let spawned = team
                    .builder()
                    .name(format!("smp-omp-{}", number))
                    .spawn(move |_| member(number));
                if let Err(e) = spawned {
                    log::warn!(
                        "Cannot start team member {}, continuing with {}: {}",
                        number,
                        number,
                        e
                    );
                    break;
                }
            }
            member(0);
        })
        .map_err(|_| ThreadError::other("Team member terminated abnormally"))?;

        first_error.into_inner().map_or(Ok(()), Err)
    }
}
