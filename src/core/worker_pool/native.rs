//! Native implementation of `WorkerPool` using OS threads.
//!
//! Every ready worker is moved into its own thread, which gives the pool the
//! exclusivity the worker contract needs: no two `process` calls ever run on
//! the same worker at once.
//!
//! # Design Principles
//!
//! - **No polling**: Workers block on channel recv; callers block on the
//!   operation's own latch
//! - **Completion is guaranteed**: every dequeued operation gets `done`, even
//!   when the worker panics
//! - **Clean shutdown**: Dropping the sender drains the queue and unblocks
//!   workers naturally; each thread runs `cleanup` on exit

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::core::error::{PoolError, ProcessError};
use crate::core::operation::{Latch, Operation};
use crate::core::worker::{ManagedWorker, Worker};

use super::{panic_message, InFlight, Job, PoolCounters, PoolStats};

/// Retry settings copied into every dispatch thread.
#[derive(Debug, Clone, Copy)]
struct DispatchPolicy {
    max_retries: u32,
    retry_backoff: Duration,
}

/// Everything a dispatch thread shares with its pool.
struct Dispatcher<O: ?Sized> {
    pool_id: Uuid,
    task_rx: Receiver<Job<O>>,
    counters: Arc<PoolCounters>,
    in_flight: Arc<InFlight>,
    stop: Arc<Latch>,
    policy: DispatchPolicy,
}

/// Worker pool with one dedicated OS thread per ready worker.
///
/// # Design
///
/// - **Exclusive workers**: each worker lives on exactly one thread
/// - **Shared FIFO**: all threads pull from one bounded queue
/// - **One dispatch per operation**: an operation that is queued or running
///   cannot be submitted again until it is done
/// - **Scheduler-owned completion**: the pool calls `Operation::done` after
///   the final outcome of every operation it dequeued
pub struct WorkerPool<W: Worker> {
    /// Identifier attached to every log line of this pool.
    id: Uuid,

    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Operation sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<Job<W::Operation>>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Opened once shutdown starts; also interrupts retry backoffs.
    stop: Arc<Latch>,

    /// Operations accepted and not yet done.
    in_flight: Arc<InFlight>,

    /// Dispatch thread handles.
    threads: Mutex<Vec<JoinHandle<()>>>,

    /// Workers whose `init` failed. Dropping them runs their cleanup.
    failed: Mutex<Vec<ManagedWorker<W>>>,

    /// Number of workers that initialized successfully.
    ready_count: usize,

    /// Number of workers whose `init` failed.
    failed_count: usize,

    /// Submission sequence counter.
    seq: AtomicU64,
}

impl<W: Worker> WorkerPool<W> {
    /// Create a pool from a set of workers.
    ///
    /// Workers are deduplicated first: a candidate is dropped (after its
    /// `cleanup`) when an already accepted worker `a` reports
    /// `a.equal(candidate)`. Every accepted worker is then initialized exactly
    /// once. Workers whose `init` fails are never given operations; they are
    /// cleaned up when the pool shuts down.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid or no
    ///   worker was supplied
    /// - `PoolError::NoReadyWorkers` if every worker failed to initialize
    /// - `PoolError::Internal` if a dispatch thread could not be spawned
    pub fn new(config: WorkerPoolConfig, workers: Vec<W>) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        if workers.is_empty() {
            return Err(PoolError::InvalidConfig("at least one worker is required".into()));
        }

        let id = Uuid::new_v4();
        let workers = dedup_workers(id, workers);

        let mut ready = Vec::with_capacity(workers.len());
        let mut failed = Vec::new();
        for (worker_id, worker) in workers.into_iter().enumerate() {
            let mut managed = ManagedWorker::new(worker_id, worker);
            match managed.init() {
                Ok(()) => {
                    debug!(pool_id = %id, worker_id = worker_id, "Worker initialized");
                    ready.push(managed);
                }
                Err(e) => {
                    warn!(
                        pool_id = %id,
                        worker_id = worker_id,
                        error = %e,
                        "Worker failed to initialize; it will not receive operations"
                    );
                    failed.push(managed);
                }
            }
        }

        if ready.is_empty() {
            error!(pool_id = %id, failed = failed.len(), "No worker initialized successfully");
            // Dropping the failed workers runs their cleanup.
            drop(failed);
            return Err(PoolError::NoReadyWorkers);
        }

        let (task_tx, task_rx) = bounded::<Job<W::Operation>>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let stop = Arc::new(Latch::new());
        let in_flight = Arc::new(InFlight::default());
        let policy = DispatchPolicy {
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        };

        let ready_count = ready.len();
        let failed_count = failed.len();
        let mut threads = Vec::with_capacity(ready_count);

        for managed in ready {
            let dispatcher = Dispatcher {
                pool_id: id,
                task_rx: task_rx.clone(),
                counters: Arc::clone(&counters),
                in_flight: Arc::clone(&in_flight),
                stop: Arc::clone(&stop),
                policy,
            };
            let spawned = spawn_dispatcher(managed, dispatcher, &config);
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    // Closing the queue lets the threads already running exit
                    // and clean up their workers.
                    stop.open();
                    drop(task_tx);
                    drop(failed);
                    error!(pool_id = %id, error = %e, "Failed to spawn dispatch thread");
                    return Err(PoolError::Internal(format!("failed to spawn worker thread: {e}")));
                }
            }
        }

        info!(
            pool_id = %id,
            ready_workers = ready_count,
            failed_workers = failed_count,
            max_queue_depth = config.max_queue_depth,
            max_retries = config.max_retries,
            "WorkerPool initialized"
        );

        Ok(Self {
            id,
            config,
            task_tx: Mutex::new(Some(task_tx)),
            counters,
            stop,
            in_flight,
            threads: Mutex::new(threads),
            failed: Mutex::new(failed),
            ready_count,
            failed_count,
            seq: AtomicU64::new(0),
        })
    }

    /// The pool's identifier, as it appears in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The configuration the pool was built with.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Submit an operation (non-blocking).
    ///
    /// The caller keeps its own handle to the operation and waits on it. Once
    /// accepted, the operation is guaranteed to be marked done, whatever the
    /// outcome. A rejected operation is left untouched.
    ///
    /// An operation is identified by its `Arc` allocation. Submitting it
    /// again while it is queued or being processed is rejected, so it never
    /// reaches two workers at once. The pool releases it right after calling
    /// `done`.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    /// - `PoolError::AlreadySubmitted` if the operation is still in flight
    pub fn submit(&self, op: Arc<W::Operation>) -> Result<(), PoolError> {
        if self.stop.is_open() {
            return Err(PoolError::PoolShutdown);
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        let key = InFlight::key(&op);
        if !self.in_flight.claim(key) {
            debug!(pool_id = %self.id, "Operation already in flight, submit rejected");
            return Err(PoolError::AlreadySubmitted);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // Count before sending so a fast worker never decrements below zero.
        self.counters.queued_operations.fetch_add(1, Ordering::Relaxed);

        match task_tx.try_send(Job { seq, op }) {
            Ok(()) => {
                self.counters.submitted_operations.fetch_add(1, Ordering::Relaxed);
                debug!(pool_id = %self.id, seq = seq, "Operation submitted");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued_operations.fetch_sub(1, Ordering::Relaxed);
                self.in_flight.release(key);
                warn!(pool_id = %self.id, "Worker pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_operations.fetch_sub(1, Ordering::Relaxed);
                self.in_flight.release(key);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Submit an operation from an async context.
    ///
    /// Enqueueing never blocks, so this simply forwards to [`submit`](Self::submit).
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub async fn submit_async(&self, op: Arc<W::Operation>) -> Result<(), PoolError> {
        self.submit(op)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.ready_count, self.failed_count)
    }

    /// Whether `shutdown` has been called (or the pool was dropped).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.stop.is_open()
    }

    /// Shut down the pool.
    ///
    /// Stops accepting operations, lets the dispatch threads drain what is
    /// already queued, and waits up to `shutdown_timeout` in total for all of
    /// them. Threads still busy at the deadline are detached. Retries still
    /// pending, including ones sleeping out their backoff, are abandoned and
    /// routed to `handle_error`. Every worker is cleaned up exactly once:
    /// ready workers by their own thread on exit, failed workers here.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        if !self.stop.open() {
            return;
        }

        info!(pool_id = %self.id, "Shutting down worker pool");

        // Drop the sender to unblock all workers waiting on recv()
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        let mut threads = self.threads.lock();
        let thread_count = threads.len();

        for (idx, handle) in threads.drain(..).enumerate() {
            let joined = if handle.is_finished() {
                Ok(handle.join().is_ok())
            } else {
                // Join through a helper thread so a stuck worker cannot hang us.
                let (tx, rx) = std::sync::mpsc::channel();
                let _joiner = thread::spawn(move || {
                    let _ = tx.send(handle.join().is_ok());
                });
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            };

            match joined {
                Ok(true) => debug!(pool_id = %self.id, thread = idx, "Dispatch thread joined"),
                Ok(false) => warn!(pool_id = %self.id, thread = idx, "Dispatch thread panicked"),
                Err(_) => {
                    // The worker still cleans up when its current operation
                    // returns.
                    warn!(
                        pool_id = %self.id,
                        thread = idx,
                        timeout = ?timeout,
                        "Dispatch thread did not exit before the shutdown deadline - detaching"
                    );
                }
            }
        }

        let cleaned = {
            let mut failed = self.failed.lock();
            let n = failed.len();
            failed.clear();
            n
        };

        info!(
            pool_id = %self.id,
            threads = thread_count,
            failed_workers_cleaned = cleaned,
            "Worker pool shut down complete"
        );
    }
}

impl<W: Worker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        // Signal shutdown but don't join: threads drain the queue and clean
        // up their workers on their own. Failed workers are cleaned up when
        // `failed` is dropped.
        if self.stop.open() {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!(pool_id = %self.id, "WorkerPool dropped without explicit shutdown - threads detached");
        }
    }
}

impl<W: Worker> std::fmt::Debug for WorkerPool<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("ready_workers", &self.ready_count)
            .field("failed_workers", &self.failed_count)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Keep the first of every group of equal workers, cleaning up the rest.
fn dedup_workers<W: Worker>(pool_id: Uuid, workers: Vec<W>) -> Vec<W> {
    let mut accepted: Vec<W> = Vec::with_capacity(workers.len());
    for mut candidate in workers {
        if accepted.iter().any(|existing| existing.equal(&candidate)) {
            warn!(pool_id = %pool_id, "Duplicate worker rejected");
            candidate.cleanup();
            continue;
        }
        accepted.push(candidate);
    }
    accepted
}

/// Spawn the dispatch thread that owns one worker.
fn spawn_dispatcher<W: Worker>(
    mut managed: ManagedWorker<W>,
    dispatcher: Dispatcher<W::Operation>,
    config: &WorkerPoolConfig,
) -> std::io::Result<JoinHandle<()>> {
    let worker_id = managed.id();
    thread::Builder::new()
        .name(format!("{}-{worker_id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            let pool_id = dispatcher.pool_id;
            debug!(pool_id = %pool_id, worker_id = worker_id, "Dispatch thread started");

            // When the sender is dropped, recv keeps returning buffered jobs
            // and only then reports disconnection.
            while let Ok(job) = dispatcher.task_rx.recv() {
                let counters = &dispatcher.counters;
                counters.queued_operations.fetch_sub(1, Ordering::Relaxed);
                counters.active_operations.fetch_add(1, Ordering::Relaxed);

                dispatcher.dispatch(&mut managed, &job);

                counters.active_operations.fetch_sub(1, Ordering::Relaxed);
            }

            managed.cleanup();
            debug!(pool_id = %pool_id, worker_id = worker_id, "Worker cleaned up, dispatch thread exiting");
        })
}

impl<O: Operation + ?Sized> Dispatcher<O> {
    /// Drive one operation to its final outcome on one worker, then mark it
    /// done and release it for resubmission.
    fn dispatch<W: Worker<Operation = O>>(&self, managed: &mut ManagedWorker<W>, job: &Job<O>) {
        let pool_id = self.pool_id;
        let counters = &self.counters;
        let worker_id = managed.id();
        let op = job.op.as_ref();
        let mut retries: u32 = 0;

        loop {
            let outcome = catch_unwind(AssertUnwindSafe(|| managed.process(op)));
            let err = match outcome {
                Ok(Ok(())) => {
                    counters.completed_operations.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        pool_id = %pool_id,
                        worker_id = worker_id,
                        seq = job.seq,
                        retries = retries,
                        "Operation completed"
                    );
                    break;
                }
                Ok(Err(e)) => e,
                Err(payload) => {
                    managed.recover();
                    let msg = panic_message(payload.as_ref());
                    error!(pool_id = %pool_id, worker_id = worker_id, seq = job.seq, panic = %msg, "Worker panicked while processing");
                    ProcessError::permanent(anyhow::anyhow!("worker panicked: {msg}"))
                }
            };

            if err.is_retryable() && retries < self.policy.max_retries && self.backoff() {
                retries += 1;
                counters.retries.fetch_add(1, Ordering::Relaxed);
                debug!(
                    pool_id = %pool_id,
                    worker_id = worker_id,
                    seq = job.seq,
                    attempt = retries,
                    error = %err,
                    "Transient failure, retrying operation"
                );
                op.increment_try();
                continue;
            }

            counters.failed_operations.fetch_add(1, Ordering::Relaxed);
            warn!(
                pool_id = %pool_id,
                worker_id = worker_id,
                seq = job.seq,
                retries = retries,
                retryable = err.is_retryable(),
                error = %err,
                "Operation failed"
            );
            let handled = catch_unwind(AssertUnwindSafe(|| managed.handle_error(&err, op)));
            if let Err(payload) = handled {
                error!(
                    pool_id = %pool_id,
                    worker_id = worker_id,
                    panic = %panic_message(payload.as_ref()),
                    "Worker panicked in handle_error"
                );
            }
            break;
        }

        op.done();
        self.in_flight.release(InFlight::key(&job.op));
    }

    /// Sleep out the retry backoff. Returns `false` when the pool is shutting
    /// down, before or during the pause.
    fn backoff(&self) -> bool {
        if self.stop.is_open() {
            return false;
        }
        self.policy.retry_backoff.is_zero() || !self.stop.wait_timeout(self.policy.retry_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{downcast_worker, AppResult, DynWorker, OperationState};
    use std::sync::atomic::AtomicUsize;

    /// Worker that fails transiently a fixed number of times per operation.
    struct FlakyWorker {
        name: &'static str,
        failures_left: u32,
        processed: Arc<AtomicUsize>,
        handled: Arc<AtomicUsize>,
        cleaned: Arc<AtomicUsize>,
    }

    impl FlakyWorker {
        fn new(name: &'static str, failures: u32) -> Self {
            Self {
                name,
                failures_left: failures,
                processed: Arc::new(AtomicUsize::new(0)),
                handled: Arc::new(AtomicUsize::new(0)),
                cleaned: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Worker for FlakyWorker {
        type Operation = OperationState;

        fn init(&mut self) -> AppResult<()> {
            Ok(())
        }

        fn process(&mut self, _op: &Self::Operation) -> Result<(), ProcessError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ProcessError::transient(anyhow::anyhow!("busy")));
            }
            Ok(())
        }

        fn handle_error(&mut self, _err: &ProcessError, _op: &Self::Operation) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }

        fn equal(&self, other: &DynWorker<Self::Operation>) -> bool {
            downcast_worker::<Self>(other).is_some_and(|other| self.name == other.name)
        }

        fn cleanup(&mut self) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_retry_until_success() {
        let worker = FlakyWorker::new("a", 2);
        let processed = Arc::clone(&worker.processed);
        let cleaned = Arc::clone(&worker.cleaned);

        let pool = WorkerPool::new(WorkerPoolConfig::new(), vec![worker]).unwrap();
        let op = Arc::new(OperationState::new());
        pool.submit(Arc::clone(&op)).unwrap();
        op.wait();

        assert_eq!(op.tries(), 2);
        assert_eq!(processed.load(Ordering::SeqCst), 3);

        pool.shutdown();
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        let stats = pool.stats();
        assert_eq!(stats.completed_operations, 1);
        assert_eq!(stats.retries, 2);
    }

    #[test]
    fn test_retries_exhausted_goes_to_handle_error() {
        let worker = FlakyWorker::new("a", 10);
        let handled = Arc::clone(&worker.handled);

        let pool =
            WorkerPool::new(WorkerPoolConfig::new().with_max_retries(1), vec![worker]).unwrap();
        let op = Arc::new(OperationState::new());
        pool.submit(Arc::clone(&op)).unwrap();
        op.wait();

        assert_eq!(op.tries(), 1);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().failed_operations, 1);
        pool.shutdown();
    }

    #[test]
    fn test_dedup_keeps_first_and_cleans_duplicate() {
        let first = FlakyWorker::new("same", 0);
        let dup = FlakyWorker::new("same", 0);
        let dup_cleaned = Arc::clone(&dup.cleaned);

        let kept = dedup_workers(Uuid::new_v4(), vec![first, dup, FlakyWorker::new("other", 0)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dup_cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_worker_list_rejected() {
        let result = WorkerPool::<FlakyWorker>::new(WorkerPoolConfig::new(), Vec::new());
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_in_flight_released_after_completion() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(), vec![FlakyWorker::new("a", 1)]).unwrap();
        let op = Arc::new(OperationState::new());
        pool.submit(Arc::clone(&op)).unwrap();
        op.wait();
        pool.shutdown();
        assert!(pool.in_flight.0.lock().is_empty());
    }

    #[test]
    fn test_backoff_interrupted_by_stop() {
        let (_task_tx, task_rx) = bounded::<Job<OperationState>>(1);
        let dispatcher = Dispatcher {
            pool_id: Uuid::new_v4(),
            task_rx,
            counters: Arc::default(),
            in_flight: Arc::default(),
            stop: Arc::new(Latch::new()),
            policy: DispatchPolicy {
                max_retries: 1,
                retry_backoff: Duration::from_secs(30),
            },
        };

        let stop = Arc::clone(&dispatcher.stop);
        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.open();
        });

        let started = Instant::now();
        assert!(!dispatcher.backoff());
        assert!(started.elapsed() < Duration::from_secs(5));
        opener.join().unwrap();
        assert!(!dispatcher.backoff());
    }
}
