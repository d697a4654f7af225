//! The `Worker` capability.
//!
//! A worker is a client or processor that handles operations: a database
//! client that turns a query into a row seeker, a map/reduce unit, a queue
//! consumer. The pool moves each worker into its own thread, so a worker is
//! only ever driven by one thread at a time and its methods take `&mut self`.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --init ok--> Ready <--process--> Processing
//!       |                      |
//!       +--init err--> Failed  |
//!                        |     |
//!                        +-----+--cleanup--> Cleaned
//! ```
//!
//! # Example
//!
//! ```
//! use parvi::core::{downcast_worker, AppResult, BasicOperation, DynWorker, ProcessError, Worker};
//!
//! struct Doubler {
//!     name: String,
//! }
//!
//! impl Worker for Doubler {
//!     type Operation = BasicOperation<u64, u64>;
//!
//!     fn init(&mut self) -> AppResult<()> {
//!         Ok(())
//!     }
//!
//!     fn process(&mut self, op: &Self::Operation) -> Result<(), ProcessError> {
//!         let value = op
//!             .payload()
//!             .checked_mul(2)
//!             .ok_or_else(|| ProcessError::permanent(anyhow::anyhow!("overflow")))?;
//!         op.set_output(value);
//!         Ok(())
//!     }
//!
//!     fn handle_error(&mut self, _err: &ProcessError, _op: &Self::Operation) {}
//!
//!     fn equal(&self, other: &DynWorker<Self::Operation>) -> bool {
//!         downcast_worker::<Self>(other).is_some_and(|other| self.name == other.name)
//!     }
//!
//!     fn cleanup(&mut self) {}
//! }
//!
//! let workers: Vec<Box<DynWorker<BasicOperation<u64, u64>>>> = vec![
//!     Box::new(Doubler { name: "a".into() }),
//!     Box::new(Doubler { name: "b".into() }),
//! ];
//! assert!(workers[0].equal(&workers[0]));
//! assert!(!workers[0].equal(&workers[1]));
//! ```

use std::any::Any;
use std::fmt;

use super::error::{AppResult, ProcessError};
use super::operation::Operation;

/// A processor that consumes operations, with its own init/cleanup lifecycle.
///
/// The trait is object safe: a pool can hold `Box<DynWorker<O>>` values of
/// different concrete types side by side, and `O` itself may be
/// `dyn Operation`.
pub trait Worker: Any + Send {
    /// The kind of operation this worker processes.
    type Operation: Operation + ?Sized;

    /// One-time setup, such as opening a connection.
    ///
    /// Called exactly once before the first `process`. An error marks the
    /// worker unusable; the pool never calls `process` on it.
    ///
    /// # Errors
    ///
    /// Any error that prevents the worker from serving operations.
    fn init(&mut self) -> AppResult<()>;

    /// Process one operation to completion.
    ///
    /// Blocks until the work is fully handled, including any asynchronous
    /// sub-work the worker manages internally. May write results into the
    /// operation and may call [`Operation::done`] itself; the pool calls it
    /// anyway once it has settled on a final outcome.
    ///
    /// # Errors
    ///
    /// A [`ProcessError`] whose retry flag tells the pool whether to dispatch
    /// the operation again.
    fn process(&mut self, op: &Self::Operation) -> Result<(), ProcessError>;

    /// Recovery hook for an operation that failed for good.
    ///
    /// Called when `process` reported a permanent failure, or when the pool
    /// stops retrying. Must not block indefinitely.
    fn handle_error(&mut self, err: &ProcessError, op: &Self::Operation);

    /// Whether `other` counts as the same worker as `self`.
    ///
    /// Reflexive and deterministic for fixed states, but not necessarily
    /// symmetric: `a.equal(b)` says nothing about `b.equal(a)`. Must not have
    /// side effects.
    ///
    /// `other` may be any worker type; [`downcast_worker`] recovers a
    /// concrete one.
    fn equal(&self, other: &DynWorker<Self::Operation>) -> bool;

    /// Release every resource the worker holds.
    ///
    /// Called exactly once, after the last use. Must tolerate a failed or
    /// skipped `init`.
    fn cleanup(&mut self);
}

/// A type-erased worker that processes `O`.
pub type DynWorker<O> = dyn Worker<Operation = O> + 'static;

/// View `other` as a `W` if that is its concrete type.
///
/// A boxed worker is looked through, so `Box<DynWorker<O>>` holding a `W`
/// also yields the `W`.
#[must_use]
pub fn downcast_worker<W: Worker>(other: &DynWorker<W::Operation>) -> Option<&W> {
    let any: &dyn Any = other;
    if let Some(worker) = any.downcast_ref::<W>() {
        return Some(worker);
    }
    let boxed = any.downcast_ref::<Box<DynWorker<W::Operation>>>()?;
    let inner: &dyn Any = &**boxed;
    inner.downcast_ref::<W>()
}

impl<O: Operation + ?Sized> Worker for Box<DynWorker<O>> {
    type Operation = O;

    fn init(&mut self) -> AppResult<()> {
        (**self).init()
    }

    fn process(&mut self, op: &O) -> Result<(), ProcessError> {
        (**self).process(op)
    }

    fn handle_error(&mut self, err: &ProcessError, op: &O) {
        (**self).handle_error(err, op);
    }

    fn equal(&self, other: &DynWorker<O>) -> bool {
        let any: &dyn Any = other;
        let other = any.downcast_ref::<Self>().map_or(other, |boxed| &**boxed);
        (**self).equal(other)
    }

    fn cleanup(&mut self) {
        (**self).cleanup();
    }
}

/// Where a worker is in its lifecycle, as tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, `init` not yet called.
    Uninitialized,
    /// Initialized and idle.
    Ready,
    /// Inside `process`.
    Processing,
    /// `init` failed; only `cleanup` may follow.
    Failed,
    /// `cleanup` has run; terminal.
    Cleaned,
}

impl WorkerState {
    /// Whether `process` may be called in this state.
    #[must_use]
    pub const fn can_process(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the worker is done for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cleaned)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// A worker plus the lifecycle state the pool enforces around it.
///
/// Every transition of the state machine goes through this wrapper, so
/// `init` runs at most once, `process` only runs on a ready worker, and
/// `cleanup` runs exactly once (on explicit request or on drop).
pub struct ManagedWorker<W: Worker> {
    id: usize,
    worker: W,
    state: WorkerState,
}

impl<W: Worker> ManagedWorker<W> {
    /// Wrap a freshly created worker.
    pub const fn new(id: usize, worker: W) -> Self {
        Self {
            id,
            worker,
            state: WorkerState::Uninitialized,
        }
    }

    /// Pool-assigned index.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// The wrapped worker.
    pub const fn get(&self) -> &W {
        &self.worker
    }

    /// Run `init` once. Later calls return `Ok` without touching the worker
    /// when it is ready, and an error otherwise.
    ///
    /// # Errors
    ///
    /// The worker's own `init` error, or a state error when the worker is
    /// already failed or cleaned.
    pub fn init(&mut self) -> AppResult<()> {
        match self.state {
            WorkerState::Uninitialized => match self.worker.init() {
                Ok(()) => {
                    self.state = WorkerState::Ready;
                    Ok(())
                }
                Err(e) => {
                    self.state = WorkerState::Failed;
                    Err(e)
                }
            },
            WorkerState::Ready => Ok(()),
            state => Err(anyhow::anyhow!("worker {} cannot be initialized while {state}", self.id)),
        }
    }

    /// Run `process` on a ready worker.
    ///
    /// # Errors
    ///
    /// The worker's `ProcessError`, or a permanent error when the worker is
    /// not ready.
    pub fn process(&mut self, op: &W::Operation) -> Result<(), ProcessError> {
        if !self.state.can_process() {
            return Err(ProcessError::permanent(anyhow::anyhow!(
                "worker {} cannot process while {}",
                self.id,
                self.state
            )));
        }
        self.state = WorkerState::Processing;
        let result = self.worker.process(op);
        self.state = WorkerState::Ready;
        result
    }

    /// Forward a terminal failure to the worker's `handle_error`.
    pub fn handle_error(&mut self, err: &ProcessError, op: &W::Operation) {
        self.worker.handle_error(err, op);
    }

    /// Run `cleanup` unless it already ran. Returns `true` if it ran now.
    pub fn cleanup(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.worker.cleanup();
        self.state = WorkerState::Cleaned;
        true
    }

    /// Mark the worker usable again after a panic unwound out of `process`.
    pub(crate) fn recover(&mut self) {
        if self.state == WorkerState::Processing {
            self.state = WorkerState::Ready;
        }
    }
}

impl<W: Worker> Drop for ManagedWorker<W> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<W: Worker> fmt::Debug for ManagedWorker<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedWorker")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
