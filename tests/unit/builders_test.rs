//! Tests for pool builders

use parvi::builders::build_pool;
use parvi::config::WorkerPoolConfig;
use parvi::core::{
    downcast_worker, AppResult, DynWorker, OperationState, PoolError, ProcessError, Worker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct NoopWorker {
    id: usize,
    cleanups: Arc<AtomicUsize>,
}

impl Worker for NoopWorker {
    type Operation = OperationState;

    fn init(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn process(&mut self, _op: &Self::Operation) -> Result<(), ProcessError> {
        Ok(())
    }

    fn handle_error(&mut self, _err: &ProcessError, _op: &Self::Operation) {}

    fn equal(&self, other: &DynWorker<Self::Operation>) -> bool {
        downcast_worker::<Self>(other).is_some_and(|other| self.id == other.id)
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_build_pool_uses_worker_count() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let factory_cleanups = Arc::clone(&cleanups);
    let pool = build_pool(WorkerPoolConfig::new().with_worker_count(5), move |id| {
        Ok(NoopWorker {
            id,
            cleanups: Arc::clone(&factory_cleanups),
        })
    })
    .unwrap();

    assert_eq!(pool.stats().ready_workers, 5);
    pool.shutdown();
    assert_eq!(cleanups.load(Ordering::SeqCst), 5);
}

#[test]
fn test_build_pool_factory_failure_cleans_up_created_workers() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let factory_cleanups = Arc::clone(&cleanups);
    let result = build_pool(WorkerPoolConfig::new().with_worker_count(4), move |id| {
        if id == 2 {
            anyhow::bail!("out of connections");
        }
        Ok(NoopWorker {
            id,
            cleanups: Arc::clone(&factory_cleanups),
        })
    });

    match result {
        Err(PoolError::Internal(msg)) => assert!(msg.contains("out of connections")),
        other => panic!("expected factory error, got {other:?}"),
    }
    assert_eq!(cleanups.load(Ordering::SeqCst), 2);
}

#[test]
fn test_build_pool_rejects_invalid_config() {
    let result = build_pool(WorkerPoolConfig::new().with_worker_count(0), |id| {
        Ok(NoopWorker {
            id,
            cleanups: Arc::new(AtomicUsize::new(0)),
        })
    });
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}
