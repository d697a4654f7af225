//! The `Operation` capability and the primitives used to implement it.
//!
//! An operation is one unit of work submitted to a pool: an HTTP request, a
//! database read, a map/reduce unit. Whatever the payload, every operation
//! carries a try counter and a completion signal. Callers block in
//! [`Operation::wait`] until someone calls [`Operation::done`].
//!
//! [`Latch`], [`TryCounter`] and [`OperationState`] are the building blocks
//! for collaborators' own operation types. [`BasicOperation`] is a ready-made
//! operation that also stores an output.
//!
//! # Examples
//!
//! ```
//! use parvi::core::{BasicOperation, Operation};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let op = Arc::new(BasicOperation::<u32, u32>::new(20));
//! let worker_side = Arc::clone(&op);
//!
//! thread::spawn(move || {
//!     worker_side.set_output(*worker_side.payload() + 22);
//!     worker_side.done();
//! });
//!
//! op.wait();
//! assert_eq!(op.take_output(), Some(42));
//! assert_eq!(op.tries(), 0);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A unit of work with try counting and completion synchronization.
///
/// All three methods take `&self`: an operation is shared (usually behind an
/// `Arc`) between the producer that waits on it and the scheduler that
/// dispatches it, so implementations synchronize internally.
///
/// None of these methods fail. Failure of the underlying work is reported by
/// [`Worker::process`](crate::core::Worker::process).
pub trait Operation: Send + Sync + 'static {
    /// Record that the operation is being tried again.
    fn increment_try(&self);

    /// Block until [`done`](Self::done) has been called at least once.
    ///
    /// Returns immediately when the operation is already done. Any number of
    /// callers may wait concurrently; all of them resume after `done`.
    fn wait(&self);

    /// Mark the operation complete and release every current and future
    /// waiter.
    ///
    /// Must be idempotent: repeated or concurrent calls are no-ops.
    fn done(&self);
}

/// A one-shot gate: closed until [`open`](Self::open), open forever after.
///
/// The flag and the condvar share one mutex, so a waiter that checks the flag
/// and then parks cannot miss an `open` that happens in between.
#[derive(Debug, Default)]
pub struct Latch {
    open: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    /// Create a closed latch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Open the latch and wake every waiter.
    ///
    /// Returns `true` only for the call that actually performed the
    /// transition; later calls leave the latch untouched.
    pub fn open(&self) -> bool {
        let mut open = self.open.lock();
        if *open {
            return false;
        }
        *open = true;
        self.cvar.notify_all();
        true
    }

    /// Whether the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until the latch is open.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        self.cvar.wait_while(&mut open, |open| !*open);
    }

    /// Block until the latch is open or `timeout` elapses.
    ///
    /// Returns `true` if the latch is open. Timing out does not change the
    /// latch.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cvar.wait_until(&mut open, deadline).timed_out() {
                break;
            }
        }
        *open
    }
}

/// Monotonic retry counter.
#[derive(Debug, Default)]
pub struct TryCounter(AtomicU32);

impl TryCounter {
    /// Create a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Add one try, saturating at `u32::MAX`. Returns the new count.
    pub fn increment(&self) -> u32 {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n);
        prev.saturating_add(1)
    }

    /// Current count.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// The bookkeeping every operation needs: a try counter and a completion
/// latch.
///
/// Embed it in your own operation type and forward the trait methods, or use
/// it directly as an `Operation` when there is no payload.
#[derive(Debug, Default)]
pub struct OperationState {
    tries: TryCounter,
    latch: Latch,
}

impl OperationState {
    /// Create a pending state with zero tries.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tries: TryCounter::new(),
            latch: Latch::new(),
        }
    }

    /// Number of times the operation has been tried again.
    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries.get()
    }

    /// Whether `done` has been called.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.latch.is_open()
    }

    /// Wait for completion with a timeout. Returns `true` if done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }
}

impl Operation for OperationState {
    fn increment_try(&self) {
        self.tries.increment();
    }

    fn wait(&self) {
        self.latch.wait();
    }

    fn done(&self) {
        self.latch.open();
    }
}

/// An operation carrying an immutable payload and an output slot.
///
/// Workers read the payload, write the output with
/// [`set_output`](Self::set_output), and the producer collects it with
/// [`take_output`](Self::take_output) after `wait` returns.
#[derive(Debug)]
pub struct BasicOperation<T, R> {
    payload: T,
    output: Mutex<Option<R>>,
    state: OperationState,
}

impl<T, R> BasicOperation<T, R> {
    /// Wrap a payload in a pending operation.
    pub const fn new(payload: T) -> Self {
        Self {
            payload,
            output: Mutex::new(None),
            state: OperationState::new(),
        }
    }

    /// The work description.
    pub const fn payload(&self) -> &T {
        &self.payload
    }

    /// Store the result, replacing any earlier one.
    pub fn set_output(&self, output: R) {
        *self.output.lock() = Some(output);
    }

    /// Take the result, leaving the slot empty.
    pub fn take_output(&self) -> Option<R> {
        self.output.lock().take()
    }

    /// Number of retries so far.
    pub fn tries(&self) -> u32 {
        self.state.tries()
    }

    /// Whether the operation is complete.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Wait for completion with a timeout. Returns `true` if done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_timeout(timeout)
    }
}

impl<T, R> Operation for BasicOperation<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    fn increment_try(&self) {
        self.state.increment_try();
    }

    fn wait(&self) {
        self.state.wait();
    }

    fn done(&self) {
        self.state.done();
    }
}

/// Wait for an operation from async code, giving up after `timeout`.
///
/// The blocking [`Operation::wait`] runs on tokio's blocking pool so the
/// async runtime is never parked. Timing out does not complete the
/// operation; the blocked helper thread resumes once `done` is eventually
/// called.
///
/// # Errors
///
/// - `PoolError::Timeout` if the operation is not done within `timeout`
/// - `PoolError::Internal` if the blocking task could not be joined
#[cfg(feature = "tokio-runtime")]
pub async fn wait_async<O: Operation + ?Sized>(
    op: std::sync::Arc<O>,
    timeout: Duration,
) -> Result<(), crate::core::PoolError> {
    let waiter = tokio::task::spawn_blocking(move || op.wait());
    match tokio::time::timeout(timeout, waiter).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(crate::core::PoolError::Internal(format!("wait task failed: {e}"))),
        Err(_) => Err(crate::core::PoolError::Timeout),
    }
}
