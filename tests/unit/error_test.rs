//! Tests for error types

use parvi::core::{PoolError, ProcessError};
use std::error::Error as _;

#[test]
fn test_queue_full_error() {
    assert_eq!(PoolError::QueueFull.to_string(), "operation queue is full");
}

#[test]
fn test_no_ready_workers_error() {
    assert_eq!(PoolError::NoReadyWorkers.to_string(), "no worker initialized successfully");
}

#[test]
fn test_timeout_error() {
    assert_eq!(PoolError::Timeout.to_string(), "operation timed out");
}

#[test]
fn test_internal_error() {
    let err = PoolError::Internal("thread spawn failed".to_string());
    assert_eq!(err.to_string(), "internal error: thread spawn failed");
}

#[test]
fn test_process_error_keeps_source() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
    let err = ProcessError::transient(io);
    assert!(err.is_retryable());
    assert_eq!(err.to_string(), "peer reset");
    assert!(err.source().is_some());
    assert!(err.inner().downcast_ref::<std::io::Error>().is_some());
}
