//! Error types for the SMP runtime

/// Result type for SMP runtime operations
pub type Result<T> = std::result::Result<T, ThreadError>;

/// Errors that can occur in the SMP runtime
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ThreadError {
    /// Thread pool is shutting down and no longer accepts work
    #[error("Thread pool '{pool_name}' is shutting down")]
    ShuttingDown {
        /// Name of the thread pool
        pool_name: String,
    },

    /// The shared thread pool could not be created
    #[error("Thread pool is unavailable: {message}")]
    PoolUnavailable {
        /// Reason the pool could not be built
        message: String,
    },

    /// Failed to spawn a worker thread with details
    #[error("Failed to spawn worker thread #{thread_id}: {message}")]
    SpawnError {
        /// Index of the thread that failed to spawn
        thread_id: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a worker thread
    #[error("Failed to join worker thread #{thread_id}: {message}")]
    JoinError {
        /// Index of the thread that failed to join
        thread_id: usize,
        /// Error message
        message: String,
    },

    /// Work returned an error
    #[error("Work on range [{first}, {last}) failed: {message}")]
    ExecutionError {
        /// First index of the failing chunk
        first: usize,
        /// One past the last index of the failing chunk
        last: usize,
        /// Error message
        message: String,
    },

    /// Work panicked while running on a thread
    #[error("Work on thread #{thread_id} panicked: {message}")]
    WorkerPanic {
        /// Key of the thread that ran the work (see [`crate::tls::thread_key`])
        thread_id: usize,
        /// Panic message
        message: String,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Asynchronous operation finished with an error
    #[error("Async operation failed: {0}")]
    AsyncFailed(String),

    /// General error
    #[error("{0}")]
    Other(String),
}

impl ThreadError {
    /// Create a shutting down error
    pub fn shutting_down(pool_name: impl Into<String>) -> Self {
        ThreadError::ShuttingDown {
            pool_name: pool_name.into(),
        }
    }

    /// Create a pool unavailable error
    pub fn pool_unavailable(message: impl Into<String>) -> Self {
        ThreadError::PoolUnavailable {
            message: message.into(),
        }
    }

    /// Create a spawn error
    pub fn spawn(thread_id: usize, message: impl Into<String>) -> Self {
        ThreadError::SpawnError {
            thread_id,
            message: message.into(),
            source: None,
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        thread_id: usize,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        ThreadError::SpawnError {
            thread_id,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(thread_id: usize, message: impl Into<String>) -> Self {
        ThreadError::JoinError {
            thread_id,
            message: message.into(),
        }
    }

    /// Create an execution error for the chunk `[first, last)`
    pub fn execution(first: usize, last: usize, message: impl Into<String>) -> Self {
        ThreadError::ExecutionError {
            first,
            last,
            message: message.into(),
        }
    }

    /// Create a worker panic error
    pub fn worker_panic(thread_id: usize, message: impl Into<String>) -> Self {
        ThreadError::WorkerPanic {
            thread_id,
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        ThreadError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an async failure from a stored message
    pub fn async_failed(message: impl Into<String>) -> Self {
        ThreadError::AsyncFailed(message.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        ThreadError::Other(msg.into())
    }

    /// Returns true if the error comes from a panic caught at a job boundary
    pub fn is_panic(&self) -> bool {
        matches!(self, ThreadError::WorkerPanic { .. })
    }
}
