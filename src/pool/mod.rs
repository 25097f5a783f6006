//! Bounded async worker pool with reject-on-full backpressure.
//!
//! A [`WorkerPool`] owns a fixed set of Tokio worker tasks draining one
//! bounded FIFO queue. Submission never blocks: a full queue is reported
//! immediately as [`SubmitError::QueueFull`] and a cancelled pool as
//! [`SubmitError::Cancelled`]. Each task runs inside a recovery boundary,
//! so a panicking task is logged and the worker keeps draining — a single
//! faulty task never takes down the pool.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Number of workers spawned when the requested count is zero.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Queue capacity used when the requested capacity is zero.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A unit of background work: a boxed future the pool drives to completion.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors produced at submission time.
///
/// These are the only failures a caller ever observes from the pool; once a
/// task is queued, its outcome is reported through logs and metrics only.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue has no free slot. The caller was not blocked.
    #[error("task queue is at capacity")]
    QueueFull,

    /// The pool's root context is cancelled (stopped, or a parent token
    /// was cancelled); no further submissions are accepted.
    #[error("worker pool is shut down")]
    Cancelled,
}

/// A fixed-size pool of async workers sharing one bounded task queue.
///
/// Handles are cheap to clone and all refer to the same pool. Workers are
/// spawned at most once per pool, either by [`WorkerPool::start`] or lazily
/// by the first [`WorkerPool::submit`]; once [`WorkerPool::stop`] has run,
/// the pool is terminal and a fresh instance is required.
///
/// # Examples
///
/// ```rust,no_run
/// use offload::pool::WorkerPool;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let pool = WorkerPool::new(CancellationToken::new(), 2, 16);
///     pool.submit(Box::pin(async {
///         // runs on a pool worker
///     }))
///     .expect("queue full");
///     pool.wait().await;
///     pool.stop().await;
/// }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    worker_count: usize,
    queue_capacity: usize,
    queue_tx: mpsc::Sender<Task>,
    queue_rx: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
    /// Root context for the pool, derived from the parent token given at
    /// construction. Cancelling it (directly via `stop`, or transitively
    /// via the parent) closes the pool to new work and exits the workers.
    root: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Tasks accepted but not yet finished (queued + in flight).
    pending: AtomicUsize,
    drained: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool without starting any workers.
    ///
    /// A zero `worker_count` or `queue_capacity` is normalized to
    /// [`DEFAULT_WORKER_COUNT`] / [`DEFAULT_QUEUE_CAPACITY`]. The pool's
    /// root context is a child of `parent`, so cancelling `parent` shuts
    /// the pool down cooperatively.
    pub fn new(parent: CancellationToken, worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = if worker_count == 0 {
            DEFAULT_WORKER_COUNT
        } else {
            worker_count
        };
        let queue_capacity = if queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };

        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);

        Self {
            inner: Arc::new(Inner {
                worker_count,
                queue_capacity,
                queue_tx,
                queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
                root: parent.child_token(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                drained: Notify::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns the worker loops. Idempotent — only the first call spawns;
    /// a stopped pool ignores the call entirely.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut handles = self.inner.handles.lock().expect("pool handle mutex poisoned");
        // A concurrent `stop` may have taken the handle vector between the
        // flag checks above and this lock; spawning now would leave workers
        // it can no longer join.
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        for id in 0..self.inner.worker_count {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(worker_loop(id, inner)));
        }

        debug!(
            workers = self.inner.worker_count,
            capacity = self.inner.queue_capacity,
            "worker pool started"
        );
    }

    /// Enqueues `task` without blocking, starting the workers lazily if
    /// needed.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Cancelled`] if the root context is already done
    ///   (the pool was stopped or its parent token cancelled).
    /// - [`SubmitError::QueueFull`] if the queue has no free slot. The
    ///   task is dropped; the caller decides whether to shed or retry.
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if !self.inner.started.load(Ordering::Acquire) {
            self.start();
        }
        if self.inner.root.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }

        // Counted before the enqueue — a worker may claim the task the
        // instant it lands in the channel.
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        match self.inner.queue_tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.settle_rejected();
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.settle_rejected();
                Err(SubmitError::Cancelled)
            }
        }
    }

    /// Waits until every currently queued and in-flight task has finished.
    ///
    /// Unlike [`WorkerPool::stop`] this does not close the pool: new tasks
    /// may still be submitted while (and after) waiting. Intended for use
    /// on a live pool; after `stop`, abandoned queued tasks never finish.
    pub async fn wait(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Stops the pool: cancels the root context, rejects all further
    /// submissions, and waits for every worker loop to exit. Queued tasks
    /// not yet claimed when cancellation lands are abandoned.
    ///
    /// Idempotent; a stopped pool is terminal.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.root.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.handles.lock().expect("pool handle mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                // Task panics are trapped inside the loop, so this only
                // fires if the worker itself was aborted or panicked.
                error!(error = %e, "worker terminated abnormally");
            }
        }

        debug!("worker pool stopped");
    }

    /// Returns the pool's root cancellation token. Tasks that should stop
    /// early when the pool shuts down can watch this token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.root.clone()
    }

    /// Number of workers this pool runs once started.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Capacity of the bounded task queue.
    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    /// `true` once the worker loops have been spawned.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// `true` if `self` and `other` are handles to the same pool instance.
    pub fn same_pool(&self, other: &WorkerPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn settle_rejected(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

/// One worker: claim a task from the shared queue, run it inside a panic
/// boundary, repeat until the root context is cancelled.
async fn worker_loop(id: usize, inner: Arc<Inner>) {
    debug!(worker = id, "worker started");

    loop {
        // The receiver is shared; hold its lock only while waiting for a
        // task, never while running one.
        let task = {
            let mut queue = inner.queue_rx.lock().await;
            tokio::select! {
                _ = inner.root.cancelled() => None,
                task = queue.recv() => task,
            }
        };

        let Some(task) = task else { break };

        if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
            error!(
                worker = id,
                panic = panic_message(payload.as_ref()),
                "background task panicked — worker recovering"
            );
        }

        if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            inner.drained.notify_waiters();
        }
    }

    debug!(worker = id, "worker exiting");
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn task<F>(fut: F) -> Task
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Box::pin(fut)
    }

    const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn zero_counts_normalize_to_defaults() {
        let pool = WorkerPool::new(CancellationToken::new(), 0, 0);
        assert_eq!(pool.worker_count(), DEFAULT_WORKER_COUNT);
        assert_eq!(pool.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert!(!pool.is_started());
    }

    // ── Execution ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn all_submitted_tasks_execute_exactly_once() {
        let pool = WorkerPool::new(CancellationToken::new(), 2, 10);
        let counter = Arc::new(Mutex::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(task(async move {
                *counter.lock().unwrap() += 1;
            }))
            .unwrap();
        }

        timeout(DRAIN_TIMEOUT, pool.wait())
            .await
            .expect("pool failed to drain");
        assert_eq!(*counter.lock().unwrap(), 10);
        pool.stop().await;
    }

    #[tokio::test]
    async fn submit_lazily_starts_the_pool() {
        let pool = WorkerPool::new(CancellationToken::new(), 1, 4);
        assert!(!pool.is_started());

        let (done_tx, done_rx) = oneshot::channel();
        pool.submit(task(async move {
            let _ = done_tx.send(());
        }))
        .unwrap();

        assert!(pool.is_started());
        timeout(DRAIN_TIMEOUT, done_rx)
            .await
            .expect("task never ran")
            .unwrap();
        pool.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let pool = WorkerPool::new(CancellationToken::new(), 2, 8);
        pool.start();
        pool.start();

        let counter = Arc::new(Mutex::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.submit(task(async move {
                *counter.lock().unwrap() += 1;
            }))
            .unwrap();
        }

        timeout(DRAIN_TIMEOUT, pool.wait()).await.unwrap();
        assert_eq!(*counter.lock().unwrap(), 4);
        pool.stop().await;
    }

    // ── Backpressure ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_on_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::new(CancellationToken::new(), 1, 1);

        // Park the only worker on a gate task so the queue cannot drain.
        let (started_tx, started_rx) = oneshot::channel();
        let gate = Arc::new(Notify::new());
        let parked = Arc::clone(&gate);
        pool.submit(task(async move {
            let _ = started_tx.send(());
            parked.notified().await;
        }))
        .unwrap();
        started_rx.await.unwrap();

        // Worker is busy: the first submission fills the single queue slot,
        // the second must be rejected immediately.
        pool.submit(task(async {})).unwrap();
        assert_eq!(pool.submit(task(async {})), Err(SubmitError::QueueFull));

        gate.notify_one();
        timeout(DRAIN_TIMEOUT, pool.wait()).await.unwrap();
        pool.stop().await;
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let pool = WorkerPool::new(CancellationToken::new(), 1, 4);
        pool.start();
        pool.stop().await;

        assert_eq!(pool.submit(task(async {})), Err(SubmitError::Cancelled));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let pool = WorkerPool::new(CancellationToken::new(), 2, 4);
        pool.start();
        pool.stop().await;
        pool.stop().await;
    }

    #[tokio::test]
    async fn start_after_stop_has_no_effect() {
        let pool = WorkerPool::new(CancellationToken::new(), 1, 4);
        pool.stop().await;
        pool.start();

        assert!(!pool.is_started());
        assert_eq!(pool.submit(task(async {})), Err(SubmitError::Cancelled));
    }

    #[tokio::test]
    async fn concurrent_start_and_stop_leave_pool_terminal() {
        // Race `start` against `stop` repeatedly; whatever the interleaving,
        // the pool must end up terminal with no workers left behind.
        for _ in 0..32 {
            let pool = WorkerPool::new(CancellationToken::new(), 2, 4);

            let starter = {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.start();
                })
            };
            let stopper = {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.stop().await;
                })
            };
            starter.await.unwrap();
            stopper.await.unwrap();

            pool.stop().await;
            assert_eq!(pool.submit(task(async {})), Err(SubmitError::Cancelled));
        }
    }

    #[tokio::test]
    async fn parent_cancellation_closes_the_pool() {
        let parent = CancellationToken::new();
        let pool = WorkerPool::new(parent.clone(), 1, 4);
        pool.start();

        parent.cancel();
        assert_eq!(pool.submit(task(async {})), Err(SubmitError::Cancelled));
        pool.stop().await;
    }

    // ── Panic containment ────────────────────────────────────────────────────

    #[tokio::test]
    async fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(CancellationToken::new(), 1, 4);

        pool.submit(task(async {
            panic!("boom");
        }))
        .unwrap();

        // The same (sole) worker must survive to run this one.
        let (done_tx, done_rx) = oneshot::channel();
        pool.submit(task(async move {
            let _ = done_tx.send(());
        }))
        .unwrap();

        timeout(DRAIN_TIMEOUT, done_rx)
            .await
            .expect("worker died after panic")
            .unwrap();
        pool.stop().await;
    }
}
