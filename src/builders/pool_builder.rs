//! Build worker pools from configuration and a worker factory.

use tracing::debug;

use crate::config::WorkerPoolConfig;
use crate::core::{AppResult, PoolError, Worker, WorkerPool};

/// Build a pool of `cfg.worker_count` workers created by `factory`.
///
/// The factory receives the worker index. If it fails part-way, the workers
/// created so far are cleaned up before the error is returned.
///
/// # Errors
///
/// - `PoolError::InvalidConfig` if the configuration is invalid
/// - `PoolError::Internal` if the factory fails
/// - any error from [`WorkerPool::new`]
pub fn build_pool<W, F>(cfg: WorkerPoolConfig, mut factory: F) -> Result<WorkerPool<W>, PoolError>
where
    W: Worker,
    F: FnMut(usize) -> AppResult<W>,
{
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let mut workers = Vec::with_capacity(cfg.worker_count);
    for index in 0..cfg.worker_count {
        match factory(index) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                for mut worker in workers {
                    worker.cleanup();
                }
                return Err(PoolError::Internal(format!("worker factory failed for worker {index}: {e}")));
            }
        }
    }

    debug!(worker_count = workers.len(), "Workers created by factory");
    WorkerPool::new(cfg, workers)
}
