//! # arbor-index
//!
//! Secondary indices and predicate search for ArborDB.
//!
//! - [`PropertyIndex`]: a B+Tree from property value to [`Posting`]
//! - Cursor algebra: [`ConjunctiveCursor`] and [`DisjunctiveCursor`] combine
//!   ascending identifier cursors without materializing their operands
//! - [`IndexSearcher`]: compiles a [`Predicate`] tree into one cursor and
//!   exposes it as a lazy [`IdentifierStream`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arbor_common::Identifier;
//! use arbor_exec::Executor;
//! use arbor_index::{IndexSearcher, Predicate, Record};
//! use arbor_store::MemoryStore;
//! use arbor_txn::OperationScheduler;
//!
//! let executor = Executor::new(2);
//! let searcher = IndexSearcher::new(
//!     Arc::new(MemoryStore::new(executor.clone())),
//!     OperationScheduler::new(executor),
//!     Identifier::parse("indices"),
//!     16,
//! );
//! searcher.create_index("age").unwrap();
//! searcher
//!     .index(&[
//!         Record::new(Identifier::parse("people/ann")).with("age", 31),
//!         Record::new(Identifier::parse("people/bob")).with("age", 25),
//!     ])
//!     .unwrap();
//!
//! let adults: Vec<Identifier> = searcher
//!     .fetch_identifiers(&Predicate::ge("age", 30))
//!     .unwrap()
//!     .collect_all()
//!     .unwrap();
//! assert_eq!(adults, vec![Identifier::parse("people/ann")]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Identifier cursors and their algebra
pub mod cursor;

/// Property index entries
pub mod posting;

/// Predicate trees and records
pub mod predicate;

/// Ordered index of one property
pub mod property;

/// Predicate evaluation
pub mod searcher;

pub use cursor::{
    ConjunctiveCursor, DisjunctiveCursor, IdCursor, IdentifierStream, ListCursor, SetCursor,
};
pub use posting::Posting;
pub use predicate::{CompareOp, Predicate, Quantifier, Record};
pub use property::PropertyIndex;
pub use searcher::{IndexSearcher, SearchStats};
