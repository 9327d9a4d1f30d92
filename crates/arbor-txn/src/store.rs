//! Scheduled raw store.

use std::sync::Arc;
use std::time::Duration;

use arbor_common::types::Identifier;
use arbor_exec::Promise;
use arbor_store::{ObjectStore, RawStore};
use bytes::Bytes;

use crate::kind::OperationKind;
use crate::scheduler::OperationScheduler;

/// A [`RawStore`] whose calls run through an [`OperationScheduler`].
///
/// Each call is registered under its path with the matching
/// [`OperationKind`]; `flush` and `close` pass straight through.
#[derive(Clone)]
pub struct ScheduledStore {
    inner: Arc<dyn RawStore>,
    scheduler: OperationScheduler,
}

impl ScheduledStore {
    /// Wraps `inner` so every call is scheduled on `scheduler`.
    pub fn new(inner: Arc<dyn RawStore>, scheduler: OperationScheduler) -> Self {
        Self { inner, scheduler }
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &OperationScheduler {
        &self.scheduler
    }
}

impl ObjectStore for ScheduledStore {
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>> {
        let inner = Arc::clone(&self.inner);
        let target = path.clone();
        self.scheduler
            .schedule(path, OperationKind::Read, move || inner.fetch(&target))
    }

    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        let target = path.clone();
        self.scheduler
            .schedule(path, OperationKind::Write, move || inner.store(&target, value))
    }

    fn delete(&self, path: &Identifier) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        let target = path.clone();
        self.scheduler
            .schedule(path, OperationKind::Delete, move || inner.delete(&target))
    }

    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>> {
        let inner = Arc::clone(&self.inner);
        let target = path.clone();
        self.scheduler
            .schedule(path, OperationKind::List, move || inner.list_children(&target))
    }
}

impl RawStore for ScheduledStore {
    fn create(&self, path: &Identifier, value: Bytes, wait: Duration) -> Promise<bool> {
        let inner = Arc::clone(&self.inner);
        let target = path.clone();
        self.scheduler.schedule(path, OperationKind::Create, move || {
            inner.create(&target, value, wait)
        })
    }

    fn flush(&self) -> Promise<()> {
        self.inner.flush()
    }

    fn close(&self) -> Promise<()> {
        self.inner.close()
    }
}
