//! Tracing integration for observability.
//!
//! Enabled by the `tracing` feature. Jobs submitted through a
//! [`Proxy`](crate::pool::Proxy) carry the submitter's span onto the worker,
//! so the chunks of a `parallel_for` show up under the span that issued it.
//! The [`metrics`] functions emit the pool and job lifecycle events.
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_smp_system::prelude::*;
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::new("rust_smp_system=trace"))
//!     .init();
//!
//! let span = tracing::info_span!("blur");
//! let _entered = span.enter();
//! parallel_for(0, 1 << 20, 0, |first, last| Ok(()))?;
//! ```

use crate::core::{Job, Result};
use std::time::Duration;

/// A job wrapper that enters the span current at submission time while the
/// job runs
pub struct TracedJob<J: Job> {
    inner: J,
    span: tracing::Span,
}

impl<J: Job> TracedJob<J> {
    /// Wrap `job`, capturing the current span
    pub fn new(job: J) -> Self {
        Self {
            inner: job,
            span: tracing::Span::current(),
        }
    }

    /// Wrap `job` with a specific span
    pub fn with_span(job: J, span: tracing::Span) -> Self {
        Self { inner: job, span }
    }
}

impl<J: Job> Job for TracedJob<J> {
    fn execute(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        self.inner.execute()
    }

    fn job_type(&self) -> &str {
        self.inner.job_type()
    }
}

/// Lifecycle events, consumable by metrics layers such as
/// tracing-opentelemetry.
pub mod metrics {
    use super::*;

    /// Records job completion with timing.
    #[inline]
    pub fn record_completion(duration: Duration, success: bool) {
        let duration_us = duration.as_micros() as u64;
        if success {
            tracing::trace!(
                counter.jobs_completed = 1,
                histogram.job_duration_us = duration_us,
                "job completed successfully"
            );
        } else {
            tracing::trace!(
                counter.jobs_failed = 1,
                histogram.job_duration_us = duration_us,
                "job failed"
            );
        }
    }

    /// Records a job panic event.
    #[inline]
    pub fn record_panic(duration: Duration) {
        tracing::trace!(
            counter.jobs_panicked = 1,
            histogram.job_duration_us = duration.as_micros() as u64,
            "job panicked"
        );
    }

    /// Records worker becoming busy.
    #[inline]
    pub fn record_worker_busy(worker_id: usize) {
        tracing::trace!(gauge.workers_busy = 1, worker_id, "worker busy");
    }

    /// Records worker becoming idle.
    #[inline]
    pub fn record_worker_idle(worker_id: usize) {
        tracing::trace!(gauge.workers_busy = -1i64, worker_id, "worker idle");
    }

    /// Records a proxy allocation.
    #[inline]
    pub fn record_proxy_allocated(threads: usize, nested: bool) {
        tracing::debug!(threads, nested, "proxy allocated");
    }

    /// Records pool startup.
    #[inline]
    pub fn record_pool_start(name: &str, num_workers: usize) {
        tracing::info!(pool = name, workers = num_workers, "thread pool started");
    }

    /// Records pool shutdown.
    #[inline]
    pub fn record_pool_shutdown(name: &str, jobs_processed: u64, jobs_failed: u64) {
        tracing::info!(
            pool = name,
            jobs_processed,
            jobs_failed,
            "thread pool shutdown complete"
        );
    }
}
