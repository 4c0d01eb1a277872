//! Fire-and-forget parallel operations with non-throwing handles
//!
//! Each operation runs on its own background thread, which drives the
//! synchronous algorithm of a [`ToolsApi`]. Errors and panics inside the
//! work end up in the returned [`AsyncHandle`] and never reach the waiter as
//! a panic.

pub mod handle;

pub use handle::{AsyncHandle, AsyncState};

use crate::core::job::catch_panic;
use crate::core::Result;
use crate::tools::ToolsApi;
use std::sync::Arc;
use std::thread;

/// Run `operation` on a background thread, completing `state` with its outcome
fn launch<T, F>(label: &'static str, operation: F) -> AsyncHandle<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let state = Arc::new(AsyncState::new());
    let completion = Arc::clone(&state);

    let spawned = thread::Builder::new()
        .name("smp-async".to_string())
        .spawn(move || match catch_panic(operation) {
            Ok(value) => {
                completion.set_value(value);
            }
            Err(e) => {
                log::warn!("Exception in {}: {}", label, e);
                completion.set_error(format!("Exception in {}: {}", label, e));
            }
        });

    if let Err(e) = spawned {
        log::error!("Cannot start {}: {}", label, e);
        state.set_error(format!("Exception in {}: {}", label, e));
    }
    AsyncHandle::new(state)
}

pub(crate) fn launch_parallel_for<F>(
    api: Arc<ToolsApi>,
    first: usize,
    last: usize,
    grain: usize,
    work: F,
) -> AsyncHandle<()>
where
    F: Fn(usize, usize) -> Result<()> + Send + Sync + 'static,
{
    launch("async_parallel_for", move || {
        api.parallel_for(first, last, grain, work)
    })
}

pub(crate) fn launch_parallel_reduce<R, M, C>(
    api: Arc<ToolsApi>,
    first: usize,
    last: usize,
    grain: usize,
    identity: R,
    map: M,
    combine: C,
) -> AsyncHandle<R>
where
    R: Clone + Send + Sync + 'static,
    M: Fn(usize, usize, R) -> Result<R> + Send + Sync + 'static,
    C: Fn(R, R) -> R + Send + Sync + 'static,
{
    launch("async_parallel_reduce", move || {
        api.parallel_reduce(first, last, grain, identity, map, combine)
    })
}

/// [`ToolsApi::async_parallel_for`] on the process-wide facade
pub fn async_parallel_for<F>(first: usize, last: usize, grain: usize, work: F) -> AsyncHandle<()>
where
    F: Fn(usize, usize) -> Result<()> + Send + Sync + 'static,
{
    ToolsApi::instance().async_parallel_for(first, last, grain, work)
}

/// [`ToolsApi::async_parallel_reduce`] on the process-wide facade
///
/// # Example
///
/// ```
/// use rust_smp_system::prelude::*;
/// use std::sync::Arc;
///
/// let data: Arc<Vec<u64>> = Arc::new(vec![1; 10_000]);
/// let chunk_data = Arc::clone(&data);
/// let handle = async_parallel_reduce(
///     0,
///     data.len(),
///     100,
///     0u64,
///     move |first, last, seed| Ok(seed + chunk_data[first..last].iter().sum::<u64>()),
///     |a, b| a + b,
/// );
/// assert_eq!(handle.get(), 10_000);
/// assert!(!handle.has_error());
/// ```
pub fn async_parallel_reduce<R, M, C>(
    first: usize,
    last: usize,
    grain: usize,
    identity: R,
    map: M,
    combine: C,
) -> AsyncHandle<R>
where
    R: Clone + Send + Sync + 'static,
    M: Fn(usize, usize, R) -> Result<R> + Send + Sync + 'static,
    C: Fn(R, R) -> R + Send + Sync + 'static,
{
    ToolsApi::instance().async_parallel_reduce(first, last, grain, identity, map, combine)
}

/// Block until every handle in `handles` is ready
pub fn when_all<T>(handles: &[AsyncHandle<T>]) {
    for handle in handles {
        handle.wait();
    }
}
