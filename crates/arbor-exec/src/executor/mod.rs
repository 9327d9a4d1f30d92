//! Fixed worker pool with a single global run queue.
//!
//! Workers pop tasks in FIFO order. Threads waiting on a [`Promise`] help the
//! pool instead of idling: they take queued tasks from the same queue and run
//! them on their own stack (see [`Executor::help`]). A thread-local nesting
//! counter bounds how deep those stolen frames may stack up.
//!
//! [`Promise`]: crate::Promise

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use arbor_common::config::ArborConfig;
use arbor_common::constants::{DEFAULT_MAX_STEAL_DEPTH, DEFAULT_POLL_INTERVAL};
use arbor_common::error::{ArborError, ArborResult};
use parking_lot::{Condvar, Mutex};

use crate::promise::Promise;

thread_local! {
    static STEAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A queued unit of work.
struct Task {
    id: u64,
    run: TaskFn,
}

/// Statistics about the executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Tasks run to completion, by workers or by waiters.
    pub executed: AtomicU64,
    /// Tasks run by a waiting caller instead of a worker.
    pub stolen: AtomicU64,
    /// Times a waiter parked because there was nothing it could run.
    pub parks: AtomicU64,
    /// Tasks that panicked.
    pub panics: AtomicU64,
}

impl ExecutorStats {
    /// Records an executed task.
    pub fn record_executed(&self) {
        self.executed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a stolen task.
    pub fn record_stolen(&self) {
        self.stolen.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a park.
    pub fn record_park(&self) {
        self.parks.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a panicking task.
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// State shared by handles and worker threads.
struct Shared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    shutdown: AtomicBool,
    next_task_id: AtomicU64,
    max_steal_depth: usize,
    poll_interval: Duration,
    stats: ExecutorStats,
}

impl Shared {
    fn execute(&self, task: Task) {
        let id = task.id;
        if panic::catch_unwind(AssertUnwindSafe(task.run)).is_err() {
            self.stats.record_panic();
            tracing::error!(task = id, "executor task panicked");
        }
        self.stats.record_executed();
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if self.shutdown.load(AtomicOrdering::Acquire) {
                        return;
                    }
                    if let Some(task) = queue.pop_front() {
                        break task;
                    }
                    self.available.wait(&mut queue);
                }
            };
            self.execute(task);
        }
    }
}

/// Owns the worker threads. Dropped with the last executor handle.
struct Pool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, AtomicOrdering::Release);
        {
            // Take the queue lock so no worker misses the wakeup between its
            // shutdown check and its wait.
            let _queue = self.shared.queue.lock();
            self.shared.available.notify_all();
        }
        let current: ThreadId = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            // The last handle may be dropped by a task running on a worker.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        tracing::debug!("executor pool shut down");
    }
}

/// Handle to a worker pool. Cloning is cheap; the pool shuts down and joins
/// its workers when the last handle is dropped.
///
/// # Example
///
/// ```rust
/// use arbor_exec::Executor;
///
/// let executor = Executor::new(1);
/// let promise = executor.spawn(|| Ok("done".to_string()));
/// assert_eq!(promise.wait(&executor).unwrap(), "done");
/// ```
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
    pool: Arc<Pool>,
}

impl Executor {
    /// Creates an executor with `workers` threads and default wait settings.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_settings(workers, DEFAULT_MAX_STEAL_DEPTH, DEFAULT_POLL_INTERVAL)
    }

    /// Creates an executor sized and tuned from a validated configuration.
    pub fn with_config(config: &ArborConfig) -> ArborResult<Self> {
        config.validate()?;
        Ok(Self::with_settings(
            config.effective_workers(),
            config.max_steal_depth,
            config.poll_interval,
        ))
    }

    /// Creates an executor with explicit settings.
    #[must_use]
    pub fn with_settings(workers: usize, max_steal_depth: usize, poll_interval: Duration) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
            max_steal_depth,
            poll_interval,
            stats: ExecutorStats::default(),
        });

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("arbor-worker-{n}"))
                .spawn(move || worker_shared.worker_loop());
            match spawned {
                Ok(handle) => handles.push(handle),
                // Waiters still drain the queue themselves, so a smaller pool
                // only costs parallelism.
                Err(e) => tracing::warn!("failed to start worker {}: {}", n, e),
            }
        }
        tracing::debug!(workers = handles.len(), "executor started");

        let pool = Arc::new(Pool {
            shared: Arc::clone(&shared),
            workers: Mutex::new(handles),
        });
        Self { shared, pool }
    }

    /// Returns the number of running worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.workers.lock().len()
    }

    /// Returns the park interval used by waiters.
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    /// Returns the executor statistics.
    #[must_use]
    pub fn stats(&self) -> &ExecutorStats {
        &self.shared.stats
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Queues `f` and returns a promise of its result.
    ///
    /// The promise remembers the task, so a caller waiting on it runs the
    /// task directly if no worker has picked it up yet. A panic inside `f`
    /// fails the promise with an internal error.
    pub fn spawn<T, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> ArborResult<T> + Send + 'static,
    {
        let promise = Promise::pending();
        let id = self.next_id();
        promise.set_task(id);
        let out = promise.clone();
        self.enqueue(Task {
            id,
            run: Box::new(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(f))
                    .unwrap_or_else(|_| Err(ArborError::internal("spawned task panicked")));
                out.complete(result);
            }),
        });
        promise
    }

    /// Queues fire-and-forget work and returns its task id.
    pub fn submit<F>(&self, f: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id();
        self.enqueue(Task {
            id,
            run: Box::new(f),
        });
        id
    }

    /// Runs one queued task on the calling thread. Returns false if the
    /// queue was empty.
    pub fn run_pending(&self) -> bool {
        let task = self.shared.queue.lock().pop_front();
        match task {
            Some(task) => {
                self.shared.execute(task);
                true
            }
            None => false,
        }
    }

    /// Runs one queued task, or sleeps for one poll interval if there is
    /// none. Used by polling loops that must not idle a worker.
    pub fn yield_now(&self) {
        if !self.help(None) {
            thread::sleep(self.shared.poll_interval);
        }
    }

    /// Runs a queued task on behalf of a waiter, preferring `preferred`.
    ///
    /// Returns false without running anything when the queue is empty or the
    /// calling thread already reached the steal nesting limit.
    pub fn help(&self, preferred: Option<u64>) -> bool {
        let depth = STEAL_DEPTH.with(Cell::get);
        if depth >= self.shared.max_steal_depth {
            return false;
        }

        let task = {
            let mut queue = self.shared.queue.lock();
            preferred
                .and_then(|id| queue.iter().position(|t| t.id == id))
                .and_then(|pos| queue.remove(pos))
                .or_else(|| queue.pop_front())
        };
        let Some(task) = task else {
            return false;
        };

        tracing::trace!(task = task.id, depth, "waiter running queued task");
        self.shared.stats.record_stolen();
        STEAL_DEPTH.with(|d| d.set(depth + 1));
        self.shared.execute(task);
        STEAL_DEPTH.with(|d| d.set(depth));
        true
    }

    fn next_id(&self) -> u64 {
        self.shared.next_task_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn enqueue(&self, task: Task) {
        self.shared.queue.lock().push_back(task);
        self.shared.available.notify_one();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_spawn_runs_on_worker() {
        let executor = Executor::new(2);
        let value = executor.spawn(|| Ok(7u64)).wait(&executor).unwrap();
        assert_eq!(value, 7);
        assert_eq!(executor.workers(), 2);
        assert!(executor.stats().executed.load(AtomicOrdering::Relaxed) >= 1);
    }

    #[test]
    fn test_many_tasks_complete() {
        let executor = Executor::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let promises: Vec<_> = (0..200)
            .map(|i| {
                let counter = Arc::clone(&counter);
                executor.spawn(move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(i)
                })
            })
            .collect();
        let values = Promise::all(promises).wait(&executor).unwrap();
        assert_eq!(values.len(), 200);
        assert_eq!(values[199], 199);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 200);
    }

    #[test]
    fn test_panicking_task_fails_promise() {
        let executor = Executor::new(1);
        let promise = executor.spawn(|| -> ArborResult<u32> { panic!("boom") });
        let err = promise.wait(&executor).unwrap_err();
        assert_eq!(err.code(), arbor_common::ErrorCode::Internal);

        // The pool survives the panic.
        assert_eq!(executor.spawn(|| Ok(5)).wait(&executor).unwrap(), 5);
    }

    #[test]
    fn test_run_pending_and_yield() {
        let executor = Executor::new(1);
        executor.yield_now();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        executor.submit(move || flag.store(true, AtomicOrdering::SeqCst));
        while !ran.load(AtomicOrdering::SeqCst) {
            executor.yield_now();
        }
    }

    #[test]
    fn test_help_respects_depth_limit() {
        let executor = Executor::with_settings(1, 0, Duration::from_millis(1));
        assert!(!executor.help(None));
    }

    #[test]
    fn test_nested_waits_inside_tasks() {
        let executor = Executor::new(1);
        let inner_exec = executor.clone();
        let outer = executor.spawn(move || {
            let a = inner_exec.spawn(|| Ok(1));
            let b = inner_exec.spawn(|| Ok(2));
            Ok(a.wait(&inner_exec)? + b.wait(&inner_exec)?)
        });
        assert_eq!(outer.wait(&executor).unwrap(), 3);
    }

    #[test]
    fn test_with_config_validates() {
        let config = ArborConfig::for_testing();
        let executor = Executor::with_config(&config).unwrap();
        assert_eq!(executor.workers(), 4);

        let bad = ArborConfig::default().with_worker_threads(0);
        assert!(Executor::with_config(&bad).is_err());
    }

    #[test]
    fn test_drop_last_handle_from_worker() {
        let executor = Executor::new(2);
        let clone = executor.clone();
        let done = executor.spawn(move || {
            drop(clone);
            Ok(())
        });
        done.wait(&executor).unwrap();
        drop(executor);
    }
}
