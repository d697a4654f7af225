//! Worker pool that drives [`Worker`](crate::core::Worker)s over shared
//! [`Operation`](crate::core::Operation)s.
//!
//! Each accepted worker is initialized once, moved into a dedicated OS thread
//! and fed from one bounded queue. The pool owns the retry policy and the
//! completion signal:
//!
//! - a transient failure re-dispatches the operation after `increment_try`,
//!   until `max_retries` is exhausted or the pool is shutting down;
//! - a permanent failure (or an abandoned retry) goes to `handle_error`;
//! - whatever the outcome, the pool calls `done` on the operation, so every
//!   `wait` caller resumes.
//!
//! # Example
//!
//! ```rust,ignore
//! use parvi::config::WorkerPoolConfig;
//! use parvi::core::{BasicOperation, Operation, WorkerPool};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_max_queue_depth(64).with_max_retries(5),
//!     vec![DbWorker::new("replica-1"), DbWorker::new("replica-2")],
//! )?;
//!
//! let op = Arc::new(BasicOperation::new(Query::by_id(42)));
//! pool.submit(Arc::clone(&op))?;
//! op.wait();
//! let row = op.take_output();
//!
//! pool.shutdown();
//! ```

#[cfg(not(target_arch = "wasm32"))]
mod native;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Statistics about pool utilization and outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers whose `init` succeeded and that run a dispatch thread.
    pub ready_workers: usize,

    /// Workers whose `init` failed; they only wait for cleanup.
    pub failed_workers: usize,

    /// Operations currently being processed.
    pub active_operations: u64,

    /// Operations waiting in the queue.
    pub queued_operations: u64,

    /// Operations accepted by `submit`.
    pub submitted_operations: u64,

    /// Operations that finished successfully.
    pub completed_operations: u64,

    /// Operations that failed for good and went to `handle_error`.
    pub failed_operations: u64,

    /// Re-dispatches after a transient failure.
    pub retries: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_operations: AtomicU64,
    pub queued_operations: AtomicU64,
    pub submitted_operations: AtomicU64,
    pub completed_operations: AtomicU64,
    pub failed_operations: AtomicU64,
    pub retries: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, ready_workers: usize, failed_workers: usize) -> PoolStats {
        PoolStats {
            ready_workers,
            failed_workers,
            active_operations: self.active_operations.load(Ordering::Relaxed),
            queued_operations: self.queued_operations.load(Ordering::Relaxed),
            submitted_operations: self.submitted_operations.load(Ordering::Relaxed),
            completed_operations: self.completed_operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// An operation queued for dispatch.
#[derive(Debug)]
pub(crate) struct Job<O: ?Sized> {
    /// Submission sequence number, for logs.
    pub seq: u64,
    /// The shared operation; the submitter keeps another handle to wait on.
    pub op: Arc<O>,
}

/// Operations a pool has accepted and not yet completed, keyed by the
/// address of their shared allocation.
///
/// A key is claimed in `submit` and released after `done`. The queued job
/// keeps the `Arc` alive in between, so an address cannot be reused while
/// its key is held.
#[derive(Debug, Default)]
pub(crate) struct InFlight(Mutex<HashSet<usize>>);

impl InFlight {
    pub fn key<O: ?Sized>(op: &Arc<O>) -> usize {
        Arc::as_ptr(op).cast::<()>().addr()
    }

    /// Returns `false` if the key is already held.
    pub fn claim(&self, key: usize) -> bool {
        self.0.lock().insert(key)
    }

    pub fn release(&self, key: usize) {
        self.0.lock().remove(&key);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::WorkerPool;
