//! Store traits.

use std::sync::Arc;
use std::time::Duration;

use arbor_common::types::Identifier;
use arbor_exec::Promise;
use bytes::Bytes;

/// Asynchronous access to a hierarchical namespace of byte objects.
///
/// Every operation returns a [`Promise`]; implementations may complete it
/// before returning.
pub trait ObjectStore: Send + Sync {
    /// Loads the object at `path`, or `None` if absent.
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>>;

    /// Writes the object at `path`, replacing any previous value.
    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()>;

    /// Removes the object at `path`.
    fn delete(&self, path: &Identifier) -> Promise<()>;

    /// Lists the immediate children of `path`, ascending.
    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>>;
}

/// A backing store with create-if-absent and lifecycle operations.
pub trait RawStore: ObjectStore {
    /// Writes `value` at `path` only if nothing is stored there.
    ///
    /// If the path is occupied, waits up to `wait` for it to be deleted
    /// before giving up. Resolves to whether this call created the object.
    fn create(&self, path: &Identifier, value: Bytes, wait: Duration) -> Promise<bool>;

    /// Makes every completed write durable.
    fn flush(&self) -> Promise<()>;

    /// Closes the store. Later operations fail.
    fn close(&self) -> Promise<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>> {
        (**self).fetch(path)
    }

    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()> {
        (**self).store(path, value)
    }

    fn delete(&self, path: &Identifier) -> Promise<()> {
        (**self).delete(path)
    }

    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>> {
        (**self).list_children(path)
    }
}

impl<S: RawStore + ?Sized> RawStore for Arc<S> {
    fn create(&self, path: &Identifier, value: Bytes, wait: Duration) -> Promise<bool> {
        (**self).create(path, value, wait)
    }

    fn flush(&self) -> Promise<()> {
        (**self).flush()
    }

    fn close(&self) -> Promise<()> {
        (**self).close()
    }
}
