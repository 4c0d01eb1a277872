//! Completion state and the handle that observes it

use crate::core::{Result, ThreadError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Outcome<T> {
    value: Option<T>,
    error: Option<String>,
}

/// Shared state of one asynchronous operation.
///
/// Moves from pending to ready exactly once, through either
/// [`set_value`](Self::set_value) or [`set_error`](Self::set_error).
pub struct AsyncState<T> {
    ready: AtomicBool,
    has_error: AtomicBool,
    outcome: Mutex<Outcome<T>>,
    completed: Condvar,
}

impl<T> AsyncState<T> {
    /// Create a pending state
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            has_error: AtomicBool::new(false),
            outcome: Mutex::new(Outcome {
                value: None,
                error: None,
            }),
            completed: Condvar::new(),
        }
    }

    /// Complete with a value; returns false if already complete
    pub fn set_value(&self, value: T) -> bool {
        let mut outcome = self.outcome.lock();
        if self.ready.load(Ordering::Acquire) {
            log::warn!("Ignoring value for an async operation that already completed");
            return false;
        }
        outcome.value = Some(value);
        self.ready.store(true, Ordering::Release);
        self.completed.notify_all();
        true
    }

    /// Complete with an error message; returns false if already complete
    pub fn set_error(&self, message: impl Into<String>) -> bool {
        let mut outcome = self.outcome.lock();
        if self.ready.load(Ordering::Acquire) {
            log::warn!("Ignoring error for an async operation that already completed");
            return false;
        }
        outcome.error = Some(message.into());
        self.has_error.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        self.completed.notify_all();
        true
    }

    /// Returns true once the operation completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns true if the operation completed with an error
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Block until the operation completes
    pub fn wait(&self) {
        let mut outcome = self.outcome.lock();
        while !self.is_ready() {
            self.completed.wait(&mut outcome);
        }
    }

    /// Block for at most `timeout`; returns whether the operation completed
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut outcome = self.outcome.lock();
        if !self.is_ready() {
            self.completed
                .wait_while_for(&mut outcome, |_| !self.is_ready(), timeout);
        }
        self.is_ready()
    }

    /// Error message, or an empty string
    pub fn error(&self) -> String {
        self.outcome.lock().error.clone().unwrap_or_default()
    }

    fn take(&self) -> std::result::Result<Option<T>, String> {
        self.wait();
        let mut outcome = self.outcome.lock();
        match &outcome.error {
            Some(message) => Err(message.clone()),
            None => Ok(outcome.value.take()),
        }
    }
}

impl<T> Default for AsyncState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncState")
            .field("ready", &self.is_ready())
            .field("has_error", &self.has_error())
            .finish()
    }
}

/// Non-throwing handle to the result of an asynchronous operation.
///
/// Failures inside the operation never unwind into the waiter; check
/// [`has_error`](Self::has_error) or use [`into_result`](Self::into_result).
/// A default-constructed handle is invalid: it is never ready and
/// [`wait`](Self::wait) returns immediately.
pub struct AsyncHandle<T> {
    state: Option<Arc<AsyncState<T>>>,
}

impl<T> AsyncHandle<T> {
    /// Handle observing `state`
    pub fn new(state: Arc<AsyncState<T>>) -> Self {
        Self { state: Some(state) }
    }

    /// Returns true if the handle is attached to an operation
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Non-blocking completion check
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_ready())
    }

    /// Block until the operation completes
    pub fn wait(&self) {
        if let Some(state) = &self.state {
            state.wait();
        }
    }

    /// Block for at most `timeout`; returns whether the operation completed
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.state.as_ref().is_some_and(|s| s.wait_for(timeout))
    }

    /// Returns true if the operation completed with an error
    pub fn has_error(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.has_error())
    }

    /// Error message of a failed operation, or an empty string
    pub fn get_error(&self) -> String {
        self.state.as_ref().map(|s| s.error()).unwrap_or_default()
    }

    /// Wait and consume the handle, returning the value or the error
    pub fn into_result(self) -> Result<T> {
        let state = self
            .state
            .ok_or_else(|| ThreadError::async_failed("handle is not attached to an operation"))?;
        match state.take() {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ThreadError::async_failed("result was already taken")),
            Err(message) => Err(ThreadError::async_failed(message)),
        }
    }
}

impl<T: Default + Clone> AsyncHandle<T> {
    /// Wait and return the value.
    ///
    /// Returns `T::default()` if the operation failed or the handle is
    /// invalid; only [`has_error`](Self::has_error) tells that apart from a
    /// real default result.
    pub fn get(&self) -> T {
        let Some(state) = &self.state else {
            return T::default();
        };
        state.wait();
        if state.has_error() {
            return T::default();
        }
        state.outcome.lock().value.clone().unwrap_or_default()
    }
}

impl<T> Default for AsyncHandle<T> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<T> Clone for AsyncHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("valid", &self.valid())
            .field("ready", &self.is_ready())
            .field("has_error", &self.has_error())
            .finish()
    }
}
