//! # Parvi
//!
//! A small execution contract for worker pools, and a native pool that
//! honors it.
//!
//! The contract has two sides:
//!
//! - **[`Operation`](core::Operation)**: a unit of work with a try counter
//!   and a completion signal. Callers block in `wait` until someone calls
//!   `done`; `done` is idempotent.
//! - **[`Worker`](core::Worker)**: a processor with `init`, `process`,
//!   `handle_error`, `equal` and `cleanup`. `process` blocks until the
//!   operation is handled and reports whether a failure is worth retrying.
//!
//! Anything that implements both sides can be scheduled by
//! [`WorkerPool`](core::WorkerPool), which owns the retry policy and always
//! marks operations done, so no `wait` caller is left hanging.
//!
//! ## Key Features
//!
//! - **Missed-wakeup-free completion**: [`Latch`](core::Latch) backs the
//!   completion signal of the bundled operations
//! - **Exclusive workers**: each worker runs on its own OS thread, and an
//!   operation is never queued or running twice in one pool
//! - **Mixed pools**: `Box<DynWorker<O>>` lets one pool hold several worker
//!   types, and `O` may be `dyn Operation`
//! - **Retry policy**: transient failures are re-dispatched up to
//!   `max_retries`, permanent ones go to `handle_error`
//! - **Exactly-once lifecycle**: `init` once, `cleanup` once, even for
//!   workers whose `init` failed
//! - **Async waiting**: [`wait_async`](core::wait_async) for tokio callers
//!
//! ## Example
//!
//! ```rust
//! use parvi::config::WorkerPoolConfig;
//! use parvi::core::{
//!     downcast_worker, AppResult, BasicOperation, DynWorker, Operation, ProcessError, Worker,
//!     WorkerPool,
//! };
//! use std::sync::Arc;
//!
//! struct Upper {
//!     id: u32,
//! }
//!
//! impl Worker for Upper {
//!     type Operation = BasicOperation<String, String>;
//!
//!     fn init(&mut self) -> AppResult<()> {
//!         Ok(())
//!     }
//!
//!     fn process(&mut self, op: &Self::Operation) -> Result<(), ProcessError> {
//!         op.set_output(op.payload().to_uppercase());
//!         Ok(())
//!     }
//!
//!     fn handle_error(&mut self, _err: &ProcessError, _op: &Self::Operation) {}
//!
//!     fn equal(&self, other: &DynWorker<Self::Operation>) -> bool {
//!         downcast_worker::<Self>(other).is_some_and(|other| self.id == other.id)
//!     }
//!
//!     fn cleanup(&mut self) {}
//! }
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(), vec![Upper { id: 0 }, Upper { id: 1 }]).unwrap();
//!
//! let op = Arc::new(BasicOperation::new("hello".to_string()));
//! pool.submit(Arc::clone(&op)).unwrap();
//! op.wait();
//! assert_eq!(op.take_output().as_deref(), Some("HELLO"));
//!
//! pool.shutdown();
//! ```
//!
//! For complete scenarios, see `tests/worker_pool_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The Operation/Worker contract, errors, and the worker pool.
pub mod core;
/// Configuration models for worker pools.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
