//! Dependency-tracking operation scheduler.
//!
//! # Scheduling
//!
//! For an incoming operation at path `P` the scheduler collects the pending
//! operations it has to follow:
//!
//! 1. operations at `P` the conflict table marks
//! 2. DELETEs at every ancestor of `P`
//! 3. for LIST and DELETE, conflicting operations anywhere below `P`
//!
//! The new operation is registered with the completion signals of those
//! prerequisites and submitted to the executor once all of them settled,
//! whatever their outcome. No worker ever blocks on a prerequisite.
//!
//! # Operation States
//!
//! ```text
//! ┌────────┐  prerequisites settled  ┌─────────┐  work resolved  ┌──────┐
//! │ Queued │────────────────────────▶│ Running │────────────────▶│ Done │
//! └────────┘                         └─────────┘                 └──────┘
//!     │                                                              ▲
//!     └──────────── superseded by a later WRITE / cancel() ─────────┘
//! ```
//!
//! Done operations are retired from the index immediately.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use arbor_common::error::ArborError;
use arbor_common::types::Identifier;
use arbor_exec::{Executor, Promise};
use parking_lot::Mutex;

use crate::kind::OperationKind;
use crate::path_index::PathIndex;

/// State of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    /// Waiting for prerequisites or for a worker.
    Queued,
    /// Work has started.
    Running,
}

/// A tracked operation.
struct OpRecord {
    path: Identifier,
    kind: OperationKind,
    state: OpState,
    /// A later WRITE may cancel this one while it is queued.
    replaceable: bool,
    /// Completes when the operation is done, for any outcome.
    done: Promise<()>,
    /// Cancels the caller-facing promise.
    cancel: Box<dyn Fn() + Send>,
}

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    ops: HashMap<u64, OpRecord>,
    index: PathIndex<u64>,
}

impl SchedulerState {
    /// Finds queued writes at `path` that an incoming write supersedes.
    ///
    /// A queued write qualifies when every operation registered at the path
    /// after it is a write and no LIST above the path registered after it
    /// could observe its effect.
    fn superseded_writes(&self, path: &Identifier) -> Vec<u64> {
        let mut superseded = Vec::new();
        for &id in self.index.at(path).iter().rev() {
            let Some(record) = self.ops.get(&id) else {
                continue;
            };
            if record.kind != OperationKind::Write || !record.replaceable {
                break;
            }
            if record.state == OpState::Queued && !self.listed_above_after(path, id) {
                superseded.push(id);
            }
        }
        superseded
    }

    fn listed_above_after(&self, path: &Identifier, id: u64) -> bool {
        self.index.ancestors_of(path).any(|(_, ids)| {
            ids.iter().any(|other| {
                *other > id
                    && self
                        .ops
                        .get(other)
                        .is_some_and(|r| r.kind == OperationKind::List)
            })
        })
    }

    fn prerequisites(&self, path: &Identifier, kind: OperationKind) -> Vec<Promise<()>> {
        let mut prereqs = Vec::new();
        let mut collect = |ids: &[u64], filter: &dyn Fn(OperationKind) -> bool| {
            for id in ids {
                if let Some(record) = self.ops.get(id) {
                    if filter(record.kind) {
                        prereqs.push(record.done.clone());
                    }
                }
            }
        };

        collect(self.index.at(path), &|pending| kind.waits_on(pending));
        for (_, ids) in self.index.ancestors_of(path) {
            collect(ids, &|pending| pending == OperationKind::Delete);
        }
        if kind.covers_subtree() {
            for (_, ids) in self.index.descendants_of(path) {
                collect(ids, &|pending| kind.waits_on(pending));
            }
        }
        prereqs
    }

    fn retire(&mut self, id: u64) -> Option<OpRecord> {
        let record = self.ops.remove(&id)?;
        self.index.remove_where(&record.path, |other| *other == id);
        Some(record)
    }
}

/// Statistics about the scheduler.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Operations registered.
    pub scheduled: AtomicU64,
    /// Operations that had at least one prerequisite.
    pub deferred: AtomicU64,
    /// Operations that ran their work.
    pub executed: AtomicU64,
    /// Queued operations cancelled before running.
    pub cancelled: AtomicU64,
}

impl SchedulerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

struct Inner {
    executor: Executor,
    state: Mutex<SchedulerState>,
    stats: SchedulerStats,
}

impl Inner {
    /// Moves a queued operation to running. False if it was cancelled.
    fn start(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.ops.get_mut(&id) {
            Some(record) if record.state == OpState::Queued => {
                record.state = OpState::Running;
                true
            }
            _ => false,
        }
    }

    fn finish(&self, id: u64) {
        let record = self.state.lock().retire(id);
        if let Some(record) = record {
            record.done.complete(Ok(()));
        }
    }

    /// Cancels `id` if it has not started. Returns true if it was cancelled.
    fn cancel_queued(&self, id: u64) -> bool {
        let record = {
            let mut state = self.state.lock();
            let queued = state
                .ops
                .get(&id)
                .is_some_and(|r| r.state == OpState::Queued);
            if queued {
                state.retire(id)
            } else {
                None
            }
        };
        let Some(record) = record else {
            return false;
        };
        SchedulerStats::bump(&self.stats.cancelled);
        tracing::debug!(id, path = %record.path, kind = %record.kind, "cancelled queued operation");
        (record.cancel)();
        record.done.complete(Ok(()));
        true
    }
}

/// Schedules operations on paths so that conflicting operations run in
/// registration order and unrelated ones run concurrently.
///
/// Cloning yields another handle to the same scheduler.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Identifier;
/// use arbor_exec::{Executor, Promise};
/// use arbor_txn::{OperationKind, OperationScheduler};
///
/// let executor = Executor::new(2);
/// let scheduler = OperationScheduler::new(executor.clone());
/// let path = Identifier::parse("a/b");
///
/// let write = scheduler.schedule(&path, OperationKind::Write, || Promise::ready(1));
/// let read = scheduler.schedule(&path, OperationKind::Read, || Promise::ready(2));
/// assert_eq!(read.wait(&executor).unwrap(), 2);
/// assert!(write.is_done());
/// ```
#[derive(Clone)]
pub struct OperationScheduler {
    inner: Arc<Inner>,
}

impl OperationScheduler {
    /// Creates a scheduler dispatching onto `executor`.
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                state: Mutex::new(SchedulerState::default()),
                stats: SchedulerStats::default(),
            }),
        }
    }

    /// Returns the executor operations run on.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Returns the scheduler statistics.
    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.inner.stats
    }

    /// Returns the number of operations not yet done.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().ops.len()
    }

    /// Returns the kinds of operations not yet done at exactly `path`, in
    /// registration order.
    #[must_use]
    pub fn pending_at(&self, path: &Identifier) -> Vec<OperationKind> {
        let state = self.inner.state.lock();
        state
            .index
            .at(path)
            .iter()
            .filter_map(|id| state.ops.get(id).map(|r| r.kind))
            .collect()
    }

    /// Schedules `work` as an operation of `kind` on `path`.
    ///
    /// `work` runs on a worker once every conflicting operation registered
    /// before it is done, whatever its outcome. The returned promise follows
    /// the promise `work` produces. Cancelling the returned promise before
    /// the work starts removes the operation; a WRITE may also be cancelled
    /// by a later WRITE at the same path.
    pub fn schedule<T, F>(&self, path: &Identifier, kind: OperationKind, work: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.register(path, kind, kind == OperationKind::Write, work)
    }

    /// Schedules `work` as a read-modify-write of `path`.
    ///
    /// It conflicts like a WRITE, but its effect depends on what it reads,
    /// so it neither cancels queued writes nor can be cancelled by later
    /// ones.
    pub fn schedule_update<T, F>(&self, path: &Identifier, work: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.register(path, OperationKind::Write, false, work)
    }

    fn register<T, F>(
        &self,
        path: &Identifier,
        kind: OperationKind,
        replaceable: bool,
        work: F,
    ) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        let result: Promise<T> = Promise::pending();
        let done: Promise<()> = Promise::pending();

        let superseded = if replaceable {
            self.inner.state.lock().superseded_writes(path)
        } else {
            Vec::new()
        };
        for id in superseded {
            self.inner.cancel_queued(id);
        }

        let (id, prereqs) = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            let prereqs = state.prerequisites(path, kind);

            let canceller = result.clone();
            state.ops.insert(
                id,
                OpRecord {
                    path: path.clone(),
                    kind,
                    state: OpState::Queued,
                    replaceable,
                    done: done.clone(),
                    cancel: Box::new(move || {
                        canceller.cancel();
                    }),
                },
            );
            state.index.insert(path.clone(), id);
            (id, prereqs)
        };

        SchedulerStats::bump(&self.inner.stats.scheduled);
        if !prereqs.is_empty() {
            SchedulerStats::bump(&self.inner.stats.deferred);
        }
        tracing::trace!(id, %path, %kind, prerequisites = prereqs.len(), "scheduled operation");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        result.set_stop_hook(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel_queued(id);
            }
        });

        let inner = Arc::clone(&self.inner);
        let out = result.clone();
        Promise::all_settled(prereqs).on_complete(move |_| {
            let runner = Arc::clone(&inner);
            inner.executor.submit(move || {
                if !runner.start(id) {
                    return;
                }
                SchedulerStats::bump(&runner.stats.executed);
                let produced = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                    Promise::failed(ArborError::internal("scheduled operation panicked"))
                });
                produced.on_complete(move |outcome| {
                    runner.finish(id);
                    out.complete(outcome);
                });
            });
        });

        result
    }
}

impl fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn setup() -> (Executor, OperationScheduler) {
        let executor = Executor::new(4);
        let scheduler = OperationScheduler::new(executor.clone());
        (executor, scheduler)
    }

    fn id(path: &str) -> Identifier {
        Identifier::parse(path)
    }

    /// Schedules an operation whose completion is controlled by the test.
    fn gated(
        scheduler: &OperationScheduler,
        path: &str,
        kind: OperationKind,
        started: &Arc<AtomicUsize>,
    ) -> (Promise<u32>, Promise<u32>) {
        let gate = Promise::pending();
        let inner_gate = gate.clone();
        let started = Arc::clone(started);
        let result = scheduler.schedule(&id(path), kind, move || {
            started.fetch_add(1, AtomicOrdering::SeqCst);
            inner_gate
        });
        (gate, result)
    }

    fn settle(started: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if started.load(AtomicOrdering::SeqCst) >= expected {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        // Give any wrongly released operation time to start.
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn test_read_waits_for_write() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, write) = gated(&scheduler, "a", OperationKind::Write, &started);
        let counter = Arc::clone(&started);
        let read = scheduler.schedule(&id("a"), OperationKind::Read, move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Promise::ready(7)
        });

        settle(&started, 1);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 1);
        assert!(!read.is_done());

        gate.complete(Ok(1));
        assert_eq!(write.wait(&executor).unwrap(), 1);
        assert_eq!(read.wait(&executor).unwrap(), 7);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_reads_run_concurrently() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (g1, r1) = gated(&scheduler, "a", OperationKind::Read, &started);
        let (g2, r2) = gated(&scheduler, "a", OperationKind::Read, &started);
        settle(&started, 2);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 2);
        g1.complete(Ok(1));
        g2.complete(Ok(2));
        assert_eq!(r1.wait(&executor).unwrap() + r2.wait(&executor).unwrap(), 3);
    }

    #[test]
    fn test_disjoint_paths_do_not_block() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, blocked) = gated(&scheduler, "a/x", OperationKind::Write, &started);
        let other = scheduler.schedule(&id("b/x"), OperationKind::Write, || Promise::ready(5));
        assert_eq!(other.wait(&executor).unwrap(), 5);
        assert!(!blocked.is_done());
        gate.complete(Ok(0));
        blocked.wait(&executor).unwrap();
    }

    #[test]
    fn test_ancestor_delete_blocks_descendants() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, delete) = gated(&scheduler, "a", OperationKind::Delete, &started);
        let (_, read) = gated(&scheduler, "a/b/c", OperationKind::Read, &started);
        settle(&started, 1);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 1);

        gate.complete(Ok(0));
        delete.wait(&executor).unwrap();
        settle(&started, 2);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 2);
        read.cancel();
    }

    #[test]
    fn test_list_waits_on_descendant_write() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, write) = gated(&scheduler, "a/b", OperationKind::Write, &started);
        let list = scheduler.schedule(&id("a"), OperationKind::List, || Promise::ready(1));
        // A read at the parent is unaffected by the descendant write.
        let read = scheduler.schedule(&id("a"), OperationKind::Read, || Promise::ready(2));
        assert_eq!(read.wait(&executor).unwrap(), 2);

        settle(&started, 1);
        assert!(!list.is_done());
        gate.complete(Ok(0));
        write.wait(&executor).unwrap();
        assert_eq!(list.wait(&executor).unwrap(), 1);
    }

    #[test]
    fn test_failure_releases_dependents() {
        let (executor, scheduler) = setup();
        let failing = scheduler.schedule(&id("a"), OperationKind::Write, || {
            Promise::<u32>::failed(ArborError::internal("disk on fire"))
        });
        let read = scheduler.schedule(&id("a"), OperationKind::Read, || Promise::ready(3));
        assert!(failing.wait(&executor).is_err());
        assert_eq!(read.wait(&executor).unwrap(), 3);
    }

    #[test]
    fn test_later_write_cancels_queued_write() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, running) = gated(&scheduler, "k", OperationKind::Write, &started);
        settle(&started, 1);

        // Queued behind the running write.
        let (_, superseded) = gated(&scheduler, "k", OperationKind::Write, &started);
        let last = scheduler.schedule(&id("k"), OperationKind::Write, || Promise::ready(9));

        assert!(superseded.is_cancelled());
        gate.complete(Ok(1));
        running.wait(&executor).unwrap();
        assert_eq!(last.wait(&executor).unwrap(), 9);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(scheduler.stats().cancelled.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_interposed_read_prevents_cancellation() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, running) = gated(&scheduler, "k", OperationKind::Write, &started);
        settle(&started, 1);

        let first = scheduler.schedule(&id("k"), OperationKind::Write, || Promise::ready(1));
        let read = scheduler.schedule(&id("k"), OperationKind::Read, || Promise::ready(2));
        let second = scheduler.schedule(&id("k"), OperationKind::Write, || Promise::ready(3));
        assert!(!first.is_cancelled());

        gate.complete(Ok(0));
        running.wait(&executor).unwrap();
        assert_eq!(first.wait(&executor).unwrap(), 1);
        assert_eq!(read.wait(&executor).unwrap(), 2);
        assert_eq!(second.wait(&executor).unwrap(), 3);
    }

    #[test]
    fn test_updates_are_never_superseded() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, running) = gated(&scheduler, "t", OperationKind::Write, &started);
        settle(&started, 1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let updates: Vec<_> = (0..3)
            .map(|n| {
                let log = Arc::clone(&log);
                scheduler.schedule_update(&id("t"), move || {
                    log.lock().push(n);
                    Promise::ready(n)
                })
            })
            .collect();
        let plain = scheduler.schedule(&id("t"), OperationKind::Write, || Promise::ready(9));

        gate.complete(Ok(0));
        running.wait(&executor).unwrap();
        for (n, update) in updates.into_iter().enumerate() {
            assert_eq!(update.wait(&executor).unwrap(), n);
        }
        assert_eq!(plain.wait(&executor).unwrap(), 9);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(scheduler.stats().cancelled.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_cancel_returned_promise_removes_operation() {
        let (executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (gate, running) = gated(&scheduler, "x", OperationKind::Write, &started);
        settle(&started, 1);
        let (_, queued) = gated(&scheduler, "x", OperationKind::Read, &started);
        assert_eq!(scheduler.pending_at(&id("x")), vec![OperationKind::Write, OperationKind::Read]);

        assert!(queued.cancel());
        assert_eq!(scheduler.pending_at(&id("x")), vec![OperationKind::Write]);
        gate.complete(Ok(0));
        running.wait(&executor).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(started.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_creates_do_not_wait_on_each_other() {
        let (_executor, scheduler) = setup();
        let started = Arc::new(AtomicUsize::new(0));
        let (g1, _c1) = gated(&scheduler, "n", OperationKind::Create, &started);
        let (g2, _c2) = gated(&scheduler, "n", OperationKind::Create, &started);
        settle(&started, 2);
        assert_eq!(started.load(AtomicOrdering::SeqCst), 2);
        g1.complete(Ok(0));
        g2.complete(Ok(0));
    }

    #[test]
    fn test_same_path_order_is_sequential() {
        let (executor, scheduler) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut promises = Vec::new();
        for i in 0..20u32 {
            let kind = if i % 3 == 0 {
                OperationKind::Read
            } else {
                OperationKind::Delete
            };
            let log = Arc::clone(&log);
            promises.push(scheduler.schedule(&id("seq"), kind, move || {
                log.lock().push(i);
                thread::sleep(Duration::from_millis(1));
                Promise::ready(i)
            }));
        }
        Promise::all(promises).wait(&executor).unwrap();
        let log = log.lock();
        assert_eq!(*log, (0..20).collect::<Vec<_>>());
    }
}
