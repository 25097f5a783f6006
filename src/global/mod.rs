//! Process-wide pool lifecycle — idempotent init plus a test-only reset.
//!
//! Composition roots that want one shared [`WorkerPool`] for the whole
//! process call [`initialize_once`] at startup and hand the returned handle
//! (or [`get`]) to their dispatchers. The slot is guarded by a mutex: the
//! first caller's parameters win, later calls get the existing handle back.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::WorkerPool;

/// The one process-wide pool slot. An empty slot doubles as the re-armed
/// state after [`reset_for_tests`].
static POOL: Mutex<Option<WorkerPool>> = Mutex::new(None);

/// Creates and starts the process-wide pool, or returns the existing handle.
///
/// Only the first caller's `worker_count` / `queue_capacity` (and parent
/// token) take effect; subsequent calls ignore their parameters entirely.
///
/// Must be called from within a Tokio runtime.
pub fn initialize_once(
    parent: CancellationToken,
    worker_count: usize,
    queue_capacity: usize,
) -> WorkerPool {
    let mut slot = POOL.lock().expect("global pool mutex poisoned");
    if let Some(pool) = slot.as_ref() {
        return pool.clone();
    }

    let pool = WorkerPool::new(parent, worker_count, queue_capacity);
    pool.start();
    *slot = Some(pool.clone());
    debug!(
        workers = pool.worker_count(),
        capacity = pool.queue_capacity(),
        "process-wide worker pool initialized"
    );
    pool
}

/// Returns a handle to the process-wide pool, or `None` if
/// [`initialize_once`] has never run (or a reset cleared it).
pub fn get() -> Option<WorkerPool> {
    POOL.lock().expect("global pool mutex poisoned").clone()
}

/// Stops and clears the process-wide pool so the next [`initialize_once`]
/// builds a genuinely new one.
///
/// Test isolation only. Not safe while other tasks are still submitting to
/// or holding the pool — callers must quiesce all users first.
pub async fn reset_for_tests() {
    let pool = POOL.lock().expect("global pool mutex poisoned").take();
    if let Some(pool) = pool {
        pool.stop().await;
    }
}
