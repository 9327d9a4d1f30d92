//! # arbor-store
//!
//! Raw, byte-addressable hierarchical object stores.
//!
//! The upper layers (revisioned sessions, B+Tree nodes, property indices)
//! only see the [`ObjectStore`] trait; the extra lifecycle operations of a
//! backing store live on [`RawStore`].
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ObjectStore trait            │
//! │  fetch, store, delete, list_children    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │             RawStore trait              │
//! │      create-if-absent, flush, close     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │              MemoryStore                │
//! │   ordered in-memory map of paths        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::types::Identifier;
//! use arbor_exec::Executor;
//! use arbor_store::{MemoryStore, ObjectStore};
//! use bytes::Bytes;
//!
//! let executor = Executor::new(1);
//! let store = MemoryStore::new(executor.clone());
//! let path = Identifier::parse("a/b");
//! store.store(&path, Bytes::from_static(b"v")).wait(&executor).unwrap();
//! let children = store.list_children(&Identifier::parse("a")).wait(&executor).unwrap();
//! assert_eq!(children, vec![path]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod memory;
mod traits;

pub use memory::{MemoryStore, StoreStats};
pub use traits::{ObjectStore, RawStore};
