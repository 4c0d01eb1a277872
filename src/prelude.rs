//! Convenient re-exports for common types and traits

pub use crate::async_ops::{async_parallel_for, async_parallel_reduce, when_all, AsyncHandle};
pub use crate::backend::{BackendKind, ParallelBackend};
pub use crate::core::{ClosureJob, Job, Result, ThreadError};
pub use crate::pool::{Proxy, ThreadPool, ThreadPoolConfig, WorkerStats};
pub use crate::tls::ThreadLocal;
pub use crate::tools::{
    estimated_default_number_of_threads, estimated_number_of_threads, initialize,
    is_parallel_scope, local_scope, nested_parallelism, parallel_for, parallel_for_functor,
    parallel_reduce, set_nested_parallelism, single_thread, ScopeConfig, SmpFunctor, ToolsApi,
};
