//! A store that fails or stalls on demand.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor_common::error::ArborError;
use arbor_common::types::Identifier;
use arbor_exec::Promise;
use arbor_store::{MemoryStore, ObjectStore, RawStore};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};

#[derive(Debug, Default)]
struct Gate {
    held: Vec<Identifier>,
    waiting: usize,
}

/// Wraps a [`MemoryStore`] and fails every call touching a poisoned
/// subtree with an I/O error. Stores into a held subtree block the caller
/// until [`FailingStore::release`].
#[derive(Clone)]
pub struct FailingStore {
    inner: MemoryStore,
    poisoned: Arc<RwLock<Vec<Identifier>>>,
    injected: Arc<AtomicU64>,
    /// Subtree and the number of stores it still accepts before poisoning.
    tripwire: Arc<Mutex<Option<(Identifier, usize)>>>,
    gate: Arc<(Mutex<Gate>, Condvar)>,
}

impl FailingStore {
    /// Wraps `inner` with nothing poisoned.
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            poisoned: Arc::new(RwLock::new(Vec::new())),
            injected: Arc::new(AtomicU64::new(0)),
            tripwire: Arc::new(Mutex::new(None)),
            gate: Arc::new((Mutex::new(Gate::default()), Condvar::new())),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fails every later call on `path` or below it.
    pub fn fail_within(&self, path: &Identifier) {
        self.poisoned.write().push(path.clone());
    }

    /// Lets `stores` more stores on `path` or below it through, then fails
    /// every later call there.
    pub fn fail_within_after(&self, path: &Identifier, stores: usize) {
        *self.tripwire.lock() = Some((path.clone(), stores));
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        self.tripwire.lock().take();
        self.poisoned.write().clear();
    }

    fn count_store(&self, path: &Identifier) {
        let mut tripwire = self.tripwire.lock();
        let Some((prefix, left)) = tripwire.as_mut() else {
            return;
        };
        if !path.is_within(prefix) {
            return;
        }
        if *left == 0 {
            let prefix = prefix.clone();
            *tripwire = None;
            self.fail_within(&prefix);
        } else {
            *left -= 1;
        }
    }

    /// Blocks later stores on `path` or below it until released.
    pub fn hold_within(&self, path: &Identifier) {
        self.gate.0.lock().held.push(path.clone());
    }

    /// Lets every held store through.
    pub fn release(&self) {
        let (lock, cvar) = &*self.gate;
        lock.lock().held.clear();
        cvar.notify_all();
    }

    /// Waits until `count` stores are blocked, or `timeout` passes.
    /// Returns true if they are.
    pub fn wait_for_held(&self, count: usize, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.gate;
        let mut gate = lock.lock();
        while gate.waiting < count {
            if cvar.wait_for(&mut gate, timeout).timed_out() {
                return gate.waiting >= count;
            }
        }
        true
    }

    fn pause(&self, path: &Identifier) {
        let (lock, cvar) = &*self.gate;
        let mut gate = lock.lock();
        let held = |g: &Gate| g.held.iter().any(|p| path.is_within(p));
        if !held(&*gate) {
            return;
        }
        tracing::debug!(%path, "holding store");
        gate.waiting += 1;
        cvar.notify_all();
        while held(&*gate) {
            cvar.wait(&mut gate);
        }
        gate.waiting -= 1;
    }

    /// Number of calls failed so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn check<T: Clone + Send + 'static>(&self, path: &Identifier) -> Option<Promise<T>> {
        let poisoned = self.poisoned.read().iter().any(|p| path.is_within(p));
        if !poisoned {
            return None;
        }
        self.injected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%path, "injecting I/O failure");
        let error = io::Error::new(io::ErrorKind::Other, format!("injected failure at {path}"));
        Some(Promise::failed(ArborError::from(error)))
    }
}

impl ObjectStore for FailingStore {
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>> {
        self.check(path).unwrap_or_else(|| self.inner.fetch(path))
    }

    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()> {
        self.pause(path);
        self.count_store(path);
        self.check(path)
            .unwrap_or_else(|| self.inner.store(path, value))
    }

    fn delete(&self, path: &Identifier) -> Promise<()> {
        self.check(path).unwrap_or_else(|| self.inner.delete(path))
    }

    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>> {
        self.check(path)
            .unwrap_or_else(|| self.inner.list_children(path))
    }
}

impl RawStore for FailingStore {
    fn create(&self, path: &Identifier, value: Bytes, wait: Duration) -> Promise<bool> {
        self.check(path)
            .unwrap_or_else(|| self.inner.create(path, value, wait))
    }

    fn flush(&self) -> Promise<()> {
        self.inner.flush()
    }

    fn close(&self) -> Promise<()> {
        self.inner.close()
    }
}

impl std::fmt::Debug for FailingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingStore")
            .field("poisoned", &self.poisoned.read().len())
            .field("injected", &self.injected())
            .finish()
    }
}
