//! In-memory raw store.
//!
//! Objects live in an ordered map keyed by [`Identifier`]. Because every
//! descendant of a path sorts contiguously right after it, children and
//! subtrees are plain range scans.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::Identifier;
use arbor_exec::{Executor, Promise};
use bytes::Bytes;
use parking_lot::RwLock;

use crate::traits::{ObjectStore, RawStore};

/// Statistics about a memory store.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Fetch calls.
    pub fetches: AtomicU64,
    /// Store calls.
    pub stores: AtomicU64,
    /// Delete calls.
    pub deletes: AtomicU64,
    /// Successful create-if-absent calls.
    pub creates: AtomicU64,
    /// Create-if-absent calls that gave up.
    pub create_failures: AtomicU64,
}

impl StoreStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

struct Inner {
    objects: RwLock<BTreeMap<Identifier, Bytes>>,
    closed: AtomicBool,
    stats: StoreStats,
}

impl Inner {
    fn check_open(&self) -> ArborResult<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(ArborError::closed("memory store"));
        }
        Ok(())
    }

    fn try_create(&self, path: &Identifier, value: &Bytes) -> bool {
        let mut objects = self.objects.write();
        if objects.contains_key(path) {
            return false;
        }
        objects.insert(path.clone(), value.clone());
        true
    }

    fn finish_create(&self, created: bool) -> bool {
        if created {
            StoreStats::bump(&self.stats.creates);
        } else {
            StoreStats::bump(&self.stats.create_failures);
        }
        created
    }
}

/// An in-memory [`RawStore`].
///
/// Cloning yields another handle to the same objects.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    executor: Executor,
}

impl MemoryStore {
    /// Creates an empty store. The executor runs create-if-absent polling.
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(Inner {
                objects: RwLock::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
                stats: StoreStats::default(),
            }),
            executor,
        }
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.objects.read().is_empty()
    }

    /// Returns true if an object is stored exactly at `path`.
    #[must_use]
    pub fn contains(&self, path: &Identifier) -> bool {
        self.inner.objects.read().contains_key(path)
    }

    /// Returns every stored path at or below `path`, ascending.
    #[must_use]
    pub fn paths_within(&self, path: &Identifier) -> Vec<Identifier> {
        self.inner
            .objects
            .read()
            .range(path.clone()..)
            .map(|(k, _)| k)
            .take_while(|k| k.is_within(path))
            .cloned()
            .collect()
    }

    /// Returns the store statistics.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.inner.stats
    }

    fn children_of(&self, path: &Identifier) -> Vec<Identifier> {
        let objects = self.inner.objects.read();
        let mut children: Vec<Identifier> = Vec::new();
        for key in objects
            .range((Bound::Excluded(path.clone()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.is_descendant_of(path))
        {
            if let Some(child) = path.child_towards(key) {
                // Descendants of one child are contiguous.
                if children.last() != Some(&child) {
                    children.push(child);
                }
            }
        }
        children
    }
}

impl ObjectStore for MemoryStore {
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>> {
        if let Err(e) = self.inner.check_open() {
            return Promise::failed(e);
        }
        StoreStats::bump(&self.inner.stats.fetches);
        Promise::ready(self.inner.objects.read().get(path).cloned())
    }

    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()> {
        if let Err(e) = self.inner.check_open() {
            return Promise::failed(e);
        }
        StoreStats::bump(&self.inner.stats.stores);
        self.inner.objects.write().insert(path.clone(), value);
        Promise::ready(())
    }

    fn delete(&self, path: &Identifier) -> Promise<()> {
        if let Err(e) = self.inner.check_open() {
            return Promise::failed(e);
        }
        StoreStats::bump(&self.inner.stats.deletes);
        let mut objects = self.inner.objects.write();
        let doomed: Vec<Identifier> = objects
            .range(path.clone()..)
            .map(|(k, _)| k)
            .take_while(|k| k.is_within(path))
            .cloned()
            .collect();
        for key in doomed {
            objects.remove(&key);
        }
        Promise::ready(())
    }

    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>> {
        if let Err(e) = self.inner.check_open() {
            return Promise::failed(e);
        }
        Promise::ready(self.children_of(path))
    }
}

impl RawStore for MemoryStore {
    fn create(&self, path: &Identifier, value: Bytes, wait: Duration) -> Promise<bool> {
        if let Err(e) = self.inner.check_open() {
            return Promise::failed(e);
        }
        let created = self.inner.try_create(path, &value);
        if created || wait.is_zero() {
            return Promise::ready(self.inner.finish_create(created));
        }

        tracing::trace!(%path, ?wait, "create waiting for colliding object");
        let inner = Arc::clone(&self.inner);
        let executor = self.executor.clone();
        let path = path.clone();
        self.executor.spawn(move || {
            let deadline = Instant::now() + wait;
            loop {
                inner.check_open()?;
                if inner.try_create(&path, &value) {
                    return Ok(inner.finish_create(true));
                }
                if Instant::now() >= deadline {
                    return Ok(inner.finish_create(false));
                }
                executor.yield_now();
            }
        })
    }

    fn flush(&self) -> Promise<()> {
        match self.inner.check_open() {
            Ok(()) => Promise::ready(()),
            Err(e) => Promise::failed(e),
        }
    }

    fn close(&self) -> Promise<()> {
        if !self.inner.closed.swap(true, AtomicOrdering::AcqRel) {
            tracing::debug!(objects = self.len(), "memory store closed");
        }
        Promise::ready(())
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("objects", &self.len())
            .field("closed", &self.inner.closed.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn setup() -> (Executor, MemoryStore) {
        let executor = Executor::new(4);
        let store = MemoryStore::new(executor.clone());
        (executor, store)
    }

    fn id(path: &str) -> Identifier {
        Identifier::parse(path)
    }

    #[test]
    fn test_store_fetch_delete() {
        let (executor, store) = setup();
        store
            .store(&id("a"), Bytes::from_static(b"1"))
            .wait(&executor)
            .unwrap();
        let got = store.fetch(&id("a")).wait(&executor).unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"1")));

        store.delete(&id("a")).wait(&executor).unwrap();
        assert_eq!(store.fetch(&id("a")).wait(&executor).unwrap(), None);
    }

    #[test]
    fn test_children_from_descendants() {
        let (executor, store) = setup();
        for path in ["a/b/c", "a/b/d", "a/e", "a0", "b"] {
            store
                .store(&id(path), Bytes::from_static(b"x"))
                .wait(&executor)
                .unwrap();
        }
        let children = store.list_children(&id("a")).wait(&executor).unwrap();
        assert_eq!(children, vec![id("a/b"), id("a/e")]);

        let top = store
            .list_children(&Identifier::root())
            .wait(&executor)
            .unwrap();
        assert_eq!(top, vec![id("a"), id("a0"), id("b")]);
    }

    #[test]
    fn test_delete_removes_subtree() {
        let (executor, store) = setup();
        for path in ["a", "a/b", "a/b/c", "ab"] {
            store
                .store(&id(path), Bytes::from_static(b"x"))
                .wait(&executor)
                .unwrap();
        }
        store.delete(&id("a")).wait(&executor).unwrap();
        assert_eq!(store.paths_within(&Identifier::root()), vec![id("ab")]);
    }

    #[test]
    fn test_create_first_writer_wins() {
        let (executor, store) = setup();
        let results: Vec<bool> = (0..16)
            .map(|i| {
                let store = store.clone();
                let executor = executor.clone();
                thread::spawn(move || {
                    store
                        .create(&id("lock"), Bytes::from(vec![i as u8]), Duration::ZERO)
                        .wait(&executor)
                        .unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert_eq!(results.iter().filter(|won| **won).count(), 1);
        assert_eq!(store.stats().creates.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_create_waits_for_delete() {
        let (executor, store) = setup();
        assert!(store
            .create(&id("slot"), Bytes::from_static(b"a"), Duration::ZERO)
            .wait(&executor)
            .unwrap());

        let waiting = store.create(&id("slot"), Bytes::from_static(b"b"), Duration::from_secs(5));
        thread::sleep(Duration::from_millis(20));
        assert!(!waiting.is_done());
        store.delete(&id("slot")).wait(&executor).unwrap();

        assert!(waiting.wait(&executor).unwrap());
        assert_eq!(
            store.fetch(&id("slot")).wait(&executor).unwrap(),
            Some(Bytes::from_static(b"b"))
        );
    }

    #[test]
    fn test_create_gives_up_after_wait() {
        let (executor, store) = setup();
        store
            .store(&id("busy"), Bytes::from_static(b"x"))
            .wait(&executor)
            .unwrap();
        let created = store
            .create(&id("busy"), Bytes::from_static(b"y"), Duration::from_millis(20))
            .wait(&executor)
            .unwrap();
        assert!(!created);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let (executor, store) = setup();
        store.close().wait(&executor).unwrap();
        let err = store.fetch(&id("a")).wait(&executor).unwrap_err();
        assert_eq!(err.code(), arbor_common::ErrorCode::Closed);
        assert!(store.flush().wait(&executor).is_err());
    }
}
