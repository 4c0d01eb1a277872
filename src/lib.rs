//! # Rust SMP System
//!
//! An adaptive parallel-for runtime with interchangeable execution backends,
//! safe nested parallel regions, lock-minimal thread-local storage and
//! non-throwing async handles.
//!
//! ## Features
//!
//! - **parallel_for / parallel_reduce**: split `[first, last)` into chunks of
//!   at most `grain` indices and run them on the selected backend
//! - **Backends**: the crate's own worker pool, fork-join teams, or a
//!   work-stealing `rayon` arena, all behind one contract
//! - **Nested parallelism**: inner regions borrow only threads the outer
//!   regions do not hold; with nesting disabled they run inline
//! - **Thread-local storage**: per-thread slots that can be iterated and
//!   combined after a parallel region
//! - **Async handles**: background operations whose failures are reported,
//!   never raised
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_smp_system::prelude::*;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! # fn main() -> Result<()> {
//! let data: Vec<u64> = (0..10_000).collect();
//! let sum = AtomicU64::new(0);
//!
//! parallel_for(0, data.len(), 0, |first, last| {
//!     sum.fetch_add(data[first..last].iter().sum::<u64>(), Ordering::Relaxed);
//!     Ok(())
//! })?;
//! assert_eq!(sum.into_inner(), 49_995_000);
//!
//! let max = parallel_reduce(
//!     0,
//!     data.len(),
//!     1000,
//!     0u64,
//!     |first, last, seed| Ok(data[first..last].iter().copied().fold(seed, u64::max)),
//!     u64::max,
//! )?;
//! assert_eq!(max, 9_999);
//! # Ok(())
//! # }
//! ```
//!
//! ## Scoped configuration
//!
//! ```rust
//! use rust_smp_system::prelude::*;
//!
//! let threads = local_scope(&ScopeConfig::with_threads(1), estimated_number_of_threads);
//! assert_eq!(threads, 1);
//! ```
//!
//! ## Worker pool and proxies
//!
//! ```rust
//! use rust_smp_system::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let pool = ThreadPool::with_threads(2)?;
//! let proxy = pool.allocate_threads(2)?;
//! for i in 0..4 {
//!     proxy.submit(move || {
//!         println!("Job {} executing", i);
//!         Ok(())
//!     })?;
//! }
//! proxy.join()?;
//! assert_eq!(pool.total_jobs_processed(), 4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod async_ops;
pub mod backend;
pub mod core;
pub mod pool;
pub mod prelude;
pub mod tls;
pub mod tools;

#[cfg(feature = "tracing")]
pub mod tracing;

pub use async_ops::{AsyncHandle, AsyncState};
pub use backend::{BackendKind, ParallelBackend};
pub use core::{Result, ThreadError};
pub use pool::{Proxy, ThreadPool, ThreadPoolConfig, WorkerStats};
pub use tls::ThreadLocal;
pub use tools::{ScopeConfig, SmpFunctor, ToolsApi};
