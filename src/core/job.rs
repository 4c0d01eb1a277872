//! Job trait and the execution boundary shared by every backend

use crate::core::error::{Result, ThreadError};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Range work: called with a half-open chunk `[first, last)`
pub type WorkFn<'a> = dyn Fn(usize, usize) -> Result<()> + Sync + 'a;

/// A unit of work submitted through a [`Proxy`](crate::pool::Proxy)
pub trait Job: Send {
    /// Execute the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job execution fails
    fn execute(&mut self) -> Result<()>;

    /// Get the job's type name for diagnostics
    fn job_type(&self) -> &str {
        "Job"
    }
}

impl fmt::Debug for dyn Job + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({})", self.job_type())
    }
}

/// A boxed job that may borrow from the scope `'a`
pub type BoxedJob<'a> = Box<dyn Job + 'a>;

/// Helper to create a job from a closure
pub struct ClosureJob<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    closure: Option<F>,
    name: String,
}

impl<F> ClosureJob<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    /// Create a new closure job
    pub fn new(closure: F) -> Self {
        Self {
            closure: Some(closure),
            name: "ClosureJob".to_string(),
        }
    }

    /// Create a new closure job with a custom name
    pub fn with_name<S: Into<String>>(closure: F, name: S) -> Self {
        Self {
            closure: Some(closure),
            name: name.into(),
        }
    }
}

impl<F> Job for ClosureJob<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn execute(&mut self) -> Result<()> {
        match self.closure.take() {
            Some(closure) => closure(),
            None => Err(ThreadError::other(
                "ClosureJob already executed - cannot execute twice",
            )),
        }
    }

    fn job_type(&self) -> &str {
        &self.name
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into [`ThreadError::WorkerPanic`]
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ThreadError::worker_panic(
            crate::tls::thread_key(),
            panic_message(payload.as_ref()),
        )),
    }
}

/// Execute one chunk of range work at the job boundary.
///
/// Never unwinds: panics raised by `work` come back as `WorkerPanic`.
pub fn run_chunk(work: &WorkFn<'_>, first: usize, last: usize) -> Result<()> {
    catch_panic(|| work(first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_job() {
        let mut job = ClosureJob::new(|| Ok(()));

        assert_eq!(job.job_type(), "ClosureJob");
        assert!(job.execute().is_ok());
        assert!(job.execute().is_err());
    }

    #[test]
    fn test_closure_job_with_name() {
        let job = ClosureJob::with_name(|| Ok(()), "TestJob");
        assert_eq!(job.job_type(), "TestJob");
    }

    #[test]
    fn test_run_chunk_converts_panic() {
        let work = |first: usize, _last: usize| -> Result<()> {
            if first == 7 {
                panic!("chunk {} exploded", first);
            }
            Ok(())
        };

        assert!(run_chunk(&work, 0, 7).is_ok());
        let err = run_chunk(&work, 7, 9).unwrap_err();
        assert!(err.is_panic());
        assert!(err.to_string().contains("chunk 7 exploded"));
    }

    #[test]
    fn test_run_chunk_passes_errors_through() {
        let work = |first: usize, last: usize| -> Result<()> {
            Err(ThreadError::execution(first, last, "rejected"))
        };

        let err = run_chunk(&work, 2, 4).unwrap_err();
        assert!(matches!(
            err,
            ThreadError::ExecutionError { first: 2, last: 4, .. }
        ));
    }
}
