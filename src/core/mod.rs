//! Core types and traits for the SMP runtime

pub mod error;
pub mod job;
pub mod partition;

pub use error::{Result, ThreadError};
pub use job::{run_chunk, BoxedJob, ClosureJob, Job, WorkFn};
pub use partition::{estimate_grain, ChunkIter, ChunkRange};
