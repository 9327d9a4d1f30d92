//! # arbor-mvcc
//!
//! Revisioned storage for ArborDB.
//!
//! This crate implements:
//! - Revision markers recorded beside each object instead of in-place writes
//! - The commit log: revision numbering, snapshots, commit validation
//! - Storage sessions with snapshot isolation over any raw store
//! - Cleanup of markers no session can observe
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arbor_common::{ArborConfig, ArborResult, Identifier};
//! use arbor_exec::Executor;
//! use arbor_mvcc::{Repository, SessionMode};
//! use arbor_store::{MemoryStore, ObjectStore};
//! use bytes::Bytes;
//!
//! fn example() -> ArborResult<()> {
//!     let executor = Executor::new(2);
//!     let raw = Arc::new(MemoryStore::new(executor.clone()));
//!     let repo = Repository::open(raw, executor.clone(), &ArborConfig::default())?;
//!
//!     let session = repo.begin_session(SessionMode::ReadWrite)?;
//!     session.store(&Identifier::parse("a/b"), Bytes::from_static(b"hello")).wait(&executor)?;
//!     let revision = session.commit().wait(&executor)?;
//!     assert_eq!(repo.last_committed(), revision);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Revision marker naming and resolution
pub mod marker;

/// Revision numbering and commit validation
pub mod revision;

/// Snapshot-isolated sessions
pub mod session;

/// Repository handle and commit log persistence
pub mod repository;

/// Marker cleanup
pub mod gc;

pub use gc::CleanupStats;
pub use marker::{MarkerKind, RevisionMarker};
pub use repository::{CommitEntry, CommitWatermark, Repository, RepositoryStats};
pub use revision::{Compaction, RevisionManager, SessionMode, SessionTicket};
pub use session::StorageSession;
