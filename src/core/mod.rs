//! The Operation/Worker contract and the pool that schedules it.

pub mod error;
pub mod operation;
pub mod worker;
pub mod worker_pool;

pub use error::{AppResult, PoolError, ProcessError};
#[cfg(feature = "tokio-runtime")]
pub use operation::wait_async;
pub use operation::{BasicOperation, Latch, Operation, OperationState, TryCounter};
pub use worker::{downcast_worker, DynWorker, ManagedWorker, Worker, WorkerState};
pub use worker_pool::{PoolStats, WorkerPool};
