//! Completable results.
//!
//! A [`Promise`] is a shared slot that is completed exactly once with an
//! [`ArborResult`]. Continuations registered with [`Promise::on_complete`]
//! run on the completing thread; the executor-bound combinators
//! ([`Promise::then`], [`Promise::and_then`]) hop onto the worker pool.
//!
//! Cancellation is a completion like any other: [`Promise::cancel`] stores
//! [`ArborError::Cancelled`], runs the stop hook and releases continuations.
//!
//! ```text
//!  pending ──complete(Ok/Err)──▶ done
//!     │
//!     └──────cancel()─────────▶ done (Err(Cancelled)) + stop hook
//! ```

use std::fmt;
use std::sync::Arc;

use arbor_common::error::{ArborError, ArborResult};
use parking_lot::{Condvar, Mutex};

use crate::executor::Executor;

type Callback<T> = Box<dyn FnOnce(ArborResult<T>) + Send + 'static>;
type StopHook = Box<dyn FnOnce() + Send + 'static>;

struct State<T> {
    result: Option<ArborResult<T>>,
    callbacks: Vec<Callback<T>>,
    stop_hook: Option<StopHook>,
    /// Executor task that will produce the result, if known.
    task: Option<u64>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// A shared, completable result.
///
/// Cloning a promise yields another handle to the same slot.
///
/// # Example
///
/// ```rust
/// use arbor_exec::{Executor, Promise};
///
/// let executor = Executor::new(1);
/// let promise = Promise::pending();
/// let seen = promise.then(&executor, |v: u32| Ok(v + 1));
/// promise.complete(Ok(1));
/// assert_eq!(seen.wait(&executor).unwrap(), 2);
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates an unresolved promise.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    result: None,
                    callbacks: Vec::new(),
                    stop_hook: None,
                    task: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Creates a promise already holding `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a promise already failed with `error`.
    #[must_use]
    pub fn failed(error: ArborError) -> Self {
        Self::settled(Err(error))
    }

    /// Creates a promise already holding `result`.
    #[must_use]
    pub fn settled(result: ArborResult<T>) -> Self {
        let promise = Self::pending();
        promise.inner.state.lock().result = Some(result);
        promise
    }

    pub(crate) fn set_task(&self, task: u64) {
        let mut state = self.inner.state.lock();
        if state.result.is_none() {
            state.task = Some(task);
        }
    }

    /// Completes the promise. Returns false if it was already done.
    pub fn complete(&self, result: ArborResult<T>) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            state.stop_hook = None;
            state.task = None;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.done.notify_all();
        for callback in callbacks {
            callback(result.clone());
        }
        true
    }

    /// Cancels the promise: completes it with [`ArborError::Cancelled`] and
    /// runs the stop hook. Returns false if it was already done.
    pub fn cancel(&self) -> bool {
        let (hook, callbacks) = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(Err(ArborError::Cancelled));
            state.task = None;
            (
                state.stop_hook.take(),
                std::mem::take(&mut state.callbacks),
            )
        };
        self.inner.done.notify_all();
        if let Some(hook) = hook {
            hook();
        }
        for callback in callbacks {
            callback(Err(ArborError::Cancelled));
        }
        true
    }

    /// Installs the hook run when the promise is cancelled. Ignored once the
    /// promise is done.
    pub fn set_stop_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.result.is_none() {
            state.stop_hook = Some(Box::new(hook));
        }
    }

    /// Returns true once the promise holds a result.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// Returns true if the promise was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.state.lock().result,
            Some(Err(ArborError::Cancelled))
        )
    }

    /// Returns the result if the promise is done, without waiting.
    #[must_use]
    pub fn try_result(&self) -> Option<ArborResult<T>> {
        self.inner.state.lock().result.clone()
    }

    /// Registers `f` to run with the result. Runs immediately on the calling
    /// thread if the promise is already done, otherwise on the completing
    /// thread.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(ArborResult<T>) + Send + 'static,
    {
        let result = {
            let mut state = self.inner.state.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(result);
    }

    /// Maps the value on the completing thread. Errors pass through.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Promise::pending();
        let out = next.clone();
        self.on_complete(move |result| {
            out.complete(result.map(f));
        });
        next
    }

    /// Runs `f` on a worker once the value is available. Errors and
    /// cancellation pass through without running `f`.
    pub fn then<U, F>(&self, executor: &Executor, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> ArborResult<U> + Send + 'static,
    {
        let next = Promise::pending();
        let out = next.clone();
        let executor = executor.clone();
        self.on_complete(move |result| match result {
            Ok(value) => {
                let task_out = out.clone();
                let id = executor.submit(move || {
                    task_out.complete(f(value));
                });
                out.set_task(id);
            }
            Err(e) => {
                out.complete(Err(e));
            }
        });
        next
    }

    /// Runs `f` on a worker once the value is available and follows the
    /// promise it returns.
    pub fn and_then<U, F>(&self, executor: &Executor, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let next = Promise::pending();
        let out = next.clone();
        let executor = executor.clone();
        self.on_complete(move |result| match result {
            Ok(value) => {
                executor.submit(move || {
                    f(value).on_complete(move |inner| {
                        out.complete(inner);
                    });
                });
            }
            Err(e) => {
                out.complete(Err(e));
            }
        });
        next
    }

    /// Blocks until the result is available.
    ///
    /// While waiting the caller runs queued tasks: first the one producing
    /// this promise, then any other. It parks for one poll interval only when
    /// nothing can be run.
    pub fn wait(&self, executor: &Executor) -> ArborResult<T> {
        loop {
            let task = {
                let state = self.inner.state.lock();
                if let Some(result) = &state.result {
                    return result.clone();
                }
                state.task
            };

            if executor.help(task) {
                continue;
            }

            let mut state = self.inner.state.lock();
            if state.result.is_none() {
                executor.stats().record_park();
                self.inner
                    .done
                    .wait_for(&mut state, executor.poll_interval());
            }
        }
    }

    /// Resolves with every value in order, or with the first error.
    pub fn all(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        if promises.is_empty() {
            return Promise::ready(Vec::new());
        }
        let out = Promise::pending();
        let slots = Arc::new(Mutex::new(Gather::new(promises.len())));
        for (i, promise) in promises.into_iter().enumerate() {
            let out = out.clone();
            let slots = Arc::clone(&slots);
            promise.on_complete(move |result| match result {
                Ok(value) => {
                    if let Some(values) = slots.lock().fill(i, value) {
                        out.complete(Ok(values));
                    }
                }
                Err(e) => {
                    out.complete(Err(e));
                }
            });
        }
        out
    }

    /// Resolves once every promise settled, with each outcome in order.
    /// Never fails.
    pub fn all_settled(promises: Vec<Promise<T>>) -> Promise<Vec<ArborResult<T>>> {
        if promises.is_empty() {
            return Promise::ready(Vec::new());
        }
        let out = Promise::pending();
        let slots = Arc::new(Mutex::new(Gather::new(promises.len())));
        for (i, promise) in promises.into_iter().enumerate() {
            let out = out.clone();
            let slots = Arc::clone(&slots);
            promise.on_complete(move |result| {
                if let Some(results) = slots.lock().fill(i, result) {
                    out.complete(Ok(results));
                }
            });
        }
        out
    }

    /// Resolves with whichever promise completes first.
    pub fn race(promises: Vec<Promise<T>>) -> Promise<T> {
        if promises.is_empty() {
            return Promise::failed(ArborError::invalid_state("race over no promises"));
        }
        let out = Promise::pending();
        for promise in promises {
            let out = out.clone();
            promise.on_complete(move |result| {
                out.complete(result);
            });
        }
        out
    }
}

/// Collects indexed results until every slot is filled.
struct Gather<V> {
    slots: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Gather<V> {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        if self.slots[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(self.slots.drain(..).flatten().collect())
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let status = match &state.result {
            None => "pending",
            Some(Ok(_)) => "ok",
            Some(Err(ArborError::Cancelled)) => "cancelled",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}
