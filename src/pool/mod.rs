//! Thread pool, proxies and worker implementations

pub mod proxy;
pub mod thread_pool;
pub mod worker;

pub use proxy::Proxy;
pub use thread_pool::{instance, ThreadPool, ThreadPoolConfig, EXTERNAL_THREAD_ID};
pub use worker::{WorkerStatSnapshot, WorkerStats};
