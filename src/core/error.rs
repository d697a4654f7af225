//! Error types for pool and worker operations.

use thiserror::Error;

/// Errors produced by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The operation queue is full; no more operations can be accepted.
    #[error("operation queue is full")]
    QueueFull,
    /// The pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// The operation is already queued or being processed by this pool.
    #[error("operation is already queued or running")]
    AlreadySubmitted,
    /// Every worker failed to initialize, so nothing could process work.
    #[error("no worker initialized successfully")]
    NoReadyWorkers,
    /// A wait did not observe completion in time.
    #[error("operation timed out")]
    Timeout,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (thread spawn, factory error, runtime error).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure returned by [`Worker::process`](crate::core::Worker::process).
///
/// `retry` tells the scheduler whether the same operation should be
/// dispatched again or treated as permanently failed.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ProcessError {
    retry: bool,
    #[source]
    source: anyhow::Error,
}

impl ProcessError {
    /// A recoverable failure; the scheduler should resubmit the operation.
    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self {
            retry: true,
            source: source.into(),
        }
    }

    /// A permanent failure; the scheduler should stop retrying.
    pub fn permanent(source: impl Into<anyhow::Error>) -> Self {
        Self {
            retry: false,
            source: source.into(),
        }
    }

    /// Whether the worker asked for the operation to be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retry
    }

    /// The underlying error.
    #[must_use]
    pub const fn inner(&self) -> &anyhow::Error {
        &self.source
    }

    /// Consume and return the underlying error.
    #[must_use]
    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

/// Application-facing result using anyhow for collaborator hooks.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::QueueFull.to_string(), "operation queue is full");
        assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::AlreadySubmitted.to_string(),
            "operation is already queued or running"
        );
        assert_eq!(
            PoolError::InvalidConfig("max_queue_depth must be greater than 0".into()).to_string(),
            "invalid configuration: max_queue_depth must be greater than 0"
        );
    }

    #[test]
    fn test_process_error_retry_flag() {
        let err = ProcessError::transient(anyhow::anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "connection reset");

        let err = ProcessError::permanent(anyhow::anyhow!("bad request"));
        assert!(!err.is_retryable());
        assert_eq!(err.into_inner().to_string(), "bad request");
    }
}
