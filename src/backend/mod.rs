//! Parallel execution backends
//!
//! Every backend runs the chunks of a range through the same
//! [`dispatch_for`] contract; the backend only decides *how* the chunks run.
//!
//! - [`StdThreadBackend`]: the crate's own [`ThreadPool`](crate::pool::ThreadPool) and proxies
//! - [`OpenMpBackend`]: a fork-join team per parallel region with dynamic chunk scheduling
//! - [`TbbBackend`]: a work-stealing `rayon` arena

pub mod openmp;
pub mod std_thread;
pub mod tbb;

pub use openmp::OpenMpBackend;
pub use std_thread::StdThreadBackend;
pub use tbb::TbbBackend;

use crate::core::{estimate_grain, run_chunk, ChunkRange, Result, ThreadError, WorkFn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identifies one of the execution strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Native thread pool with proxies
    #[serde(rename = "std_thread", alias = "STDThread")]
    StdThread,
    /// Fork-join teams
    #[serde(rename = "OpenMP")]
    OpenMp,
    /// Work-stealing arena
    #[serde(rename = "TBB")]
    Tbb,
}

impl BackendKind {
    /// Every backend kind
    pub const ALL: [BackendKind; 3] = [BackendKind::StdThread, BackendKind::OpenMp, BackendKind::Tbb];

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::StdThread => "std_thread",
            BackendKind::OpenMp => "OpenMP",
            BackendKind::Tbb => "TBB",
        }
    }

    /// Parse a backend name, ignoring case; `STDThread` and `std_thread` both
    /// name the native pool
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "STDTHREAD" | "STD_THREAD" => Some(BackendKind::StdThread),
            "OPENMP" => Some(BackendKind::OpenMp),
            "TBB" => Some(BackendKind::Tbb),
            _ => None,
        }
    }

    /// Backend selected at compile time through cargo features
    pub fn compiled() -> Self {
        if cfg!(feature = "tbb") {
            BackendKind::Tbb
        } else if cfg!(feature = "openmp") {
            BackendKind::OpenMp
        } else {
            BackendKind::StdThread
        }
    }

    /// Create a backend of this kind with default settings
    pub fn create(self) -> Box<dyn ParallelBackend> {
        match self {
            BackendKind::StdThread => Box::new(StdThreadBackend::new()),
            BackendKind::OpenMp => Box::new(OpenMpBackend::new()),
            BackendKind::Tbb => Box::new(TbbBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = ThreadError;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::from_name(s).ok_or_else(|| {
            ThreadError::invalid_config("backend", format!("unknown backend '{}'", s))
        })
    }
}

/// One parallel execution strategy.
///
/// Implementations only provide the parallel path; the edge cases of
/// `parallel_for` are handled once in [`dispatch_for`].
pub trait ParallelBackend: Send + Sync + fmt::Debug {
    /// Which strategy this is
    fn kind(&self) -> BackendKind;

    /// Apply a thread-count request: 0 resets to the default, larger values
    /// are clamped to [`estimated_default_number_of_threads`](Self::estimated_default_number_of_threads)
    fn initialize(&self, num_threads: usize);

    /// Threads a parallel region will use
    fn estimated_number_of_threads(&self) -> usize;

    /// Threads available when no count was requested
    fn estimated_default_number_of_threads(&self) -> usize;

    /// Returns true when called from inside a parallel region of this backend
    fn is_parallel_scope(&self) -> bool;

    /// Returns true only for the designated first thread of the current
    /// parallel region; false outside any region
    fn single_thread(&self) -> bool;

    /// Run every chunk of `range` through `work`, in parallel.
    ///
    /// All chunks run even if some fail; the first error is returned.
    fn execute_chunks(&self, range: ChunkRange, work: &WorkFn<'_>) -> Result<()>;
}

/// The `parallel_for` contract shared by every backend.
///
/// - `last <= first`: nothing runs.
/// - `grain >= last - first`: one call `work(first, last)` on the caller.
/// - nested parallelism off and already inside a parallel region: one call
///   on the caller.
/// - `grain == 0`: the grain is estimated from the thread count.
/// - otherwise the backend runs `[from, from + grain)` chunks clamped at `last`.
pub fn dispatch_for(
    backend: &dyn ParallelBackend,
    nested: bool,
    first: usize,
    last: usize,
    grain: usize,
    work: &WorkFn<'_>,
) -> Result<()> {
    if last <= first {
        return Ok(());
    }
    let range = last - first;
    if grain >= range || (!nested && backend.is_parallel_scope()) {
        return run_chunk(work, first, last);
    }

    let grain = if grain == 0 {
        estimate_grain(range, backend.estimated_number_of_threads())
    } else {
        grain
    };

    #[cfg(feature = "tracing")]
    tracing::trace!(backend = backend.kind().name(), first, last, grain, "parallel_for");

    backend.execute_chunks(ChunkRange::new(first, last, grain), work)
}

/// Requested thread count shared by the backends; 0 means "default"
#[derive(Debug, Default)]
pub(crate) struct ThreadCount {
    specified: AtomicUsize,
}

impl ThreadCount {
    /// Store a request, clamped to `default`; returns the effective count
    pub(crate) fn set(&self, requested: usize, default: usize) -> usize {
        let specified = requested.min(default);
        self.specified.store(specified, Ordering::Release);
        self.effective(default)
    }

    pub(crate) fn effective(&self, default: usize) -> usize {
        match self.specified.load(Ordering::Acquire) {
            0 => default,
            n => n,
        }
    }
}

/// Run every chunk on the calling thread, keeping the first error
pub(crate) fn run_serially(range: ChunkRange, work: &WorkFn<'_>) -> Result<()> {
    let mut first_error = None;
    for (from, to) in range {
        if let Err(e) = run_chunk(work, from, to) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
