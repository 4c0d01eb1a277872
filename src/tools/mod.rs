//! Parallel algorithms and runtime configuration
//!
//! The free functions here operate on the process-wide [`ToolsApi`]; build a
//! separate [`ToolsApi`] to run over a dedicated backend or pool.

pub mod api;
pub mod config;
pub mod functor;

pub use api::ToolsApi;
pub use config::{max_threads_from_env, parse_max_threads, ScopeConfig, MAX_THREADS_ENV};
pub use functor::SmpFunctor;

use crate::backend::BackendKind;
use crate::core::Result;

/// Suggested minimum amount of work for a parallel region to pay off
pub const THRESHOLD: usize = 100_000;

/// [`ToolsApi::parallel_for`] on the process-wide facade
pub fn parallel_for<F>(first: usize, last: usize, grain: usize, work: F) -> Result<()>
where
    F: Fn(usize, usize) -> Result<()> + Sync,
{
    ToolsApi::instance().parallel_for(first, last, grain, work)
}

/// [`ToolsApi::parallel_for_functor`] on the process-wide facade
pub fn parallel_for_functor<F: SmpFunctor>(
    first: usize,
    last: usize,
    grain: usize,
    functor: &mut F,
) -> Result<()> {
    ToolsApi::instance().parallel_for_functor(first, last, grain, functor)
}

/// [`ToolsApi::parallel_reduce`] on the process-wide facade
pub fn parallel_reduce<R, M, C>(
    first: usize,
    last: usize,
    grain: usize,
    identity: R,
    map: M,
    combine: C,
) -> Result<R>
where
    R: Clone + Send + Sync,
    M: Fn(usize, usize, R) -> Result<R> + Sync,
    C: Fn(R, R) -> R + Sync,
{
    ToolsApi::instance().parallel_reduce(first, last, grain, identity, map, combine)
}

/// Set the desired thread count of the process-wide facade
pub fn initialize(num_threads: usize) {
    ToolsApi::instance().initialize(num_threads);
}

/// Threads a parallel region will use
pub fn estimated_number_of_threads() -> usize {
    ToolsApi::instance().estimated_number_of_threads()
}

/// Threads available when no count was requested
pub fn estimated_default_number_of_threads() -> usize {
    ToolsApi::instance().estimated_default_number_of_threads()
}

/// Allow or forbid nested parallel regions from fanning out
pub fn set_nested_parallelism(nested: bool) {
    ToolsApi::instance().set_nested_parallelism(nested);
}

/// Whether nested parallel regions may fan out
pub fn nested_parallelism() -> bool {
    ToolsApi::instance().nested_parallelism()
}

/// Returns true when called from inside a parallel region
pub fn is_parallel_scope() -> bool {
    ToolsApi::instance().is_parallel_scope()
}

/// Returns true only for the designated first thread of the current region
pub fn single_thread() -> bool {
    ToolsApi::instance().single_thread()
}

/// [`ToolsApi::local_scope`] on the process-wide facade
pub fn local_scope<F, R>(config: &ScopeConfig, f: F) -> R
where
    F: FnOnce() -> R,
{
    ToolsApi::instance().local_scope(config, f)
}

/// Request a backend by name; see [`ToolsApi::set_backend`]
pub fn set_backend(name: &str) -> bool {
    ToolsApi::instance().set_backend(name)
}

/// Kind of the process-wide backend
pub fn backend_kind() -> BackendKind {
    ToolsApi::instance().backend_kind()
}
