//! # arbor-txn
//!
//! Operation scheduling for ArborDB.
//!
//! The [`OperationScheduler`] tracks every in-flight operation by path and
//! kind. An incoming operation waits only on the pending operations it
//! conflicts with, so unrelated paths proceed in parallel while conflicting
//! ones execute in registration order.
//!
//! - **Conflict table**: same-path dependencies per [`OperationKind`]
//! - **Hierarchy rules**: ancestor deletes block everything below them;
//!   LIST and DELETE also wait on conflicting work in their subtree
//! - **Write cancellation**: a queued write superseded by a later write is
//!   cancelled instead of executed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   OperationScheduler                      │
//! │                                                           │
//! │   schedule(path, kind, work)                              │
//! │        │                                                  │
//! │        ▼                                                  │
//! │  ┌──────────────┐   prerequisites   ┌──────────────────┐  │
//! │  │  PathIndex   │──────────────────▶│ all_settled(...) │  │
//! │  │ (path → ops) │                   └────────┬─────────┘  │
//! │  └──────────────┘                            │ submit     │
//! │                                              ▼            │
//! │                                       ┌─────────────┐     │
//! │                                       │  Executor   │     │
//! │                                       └─────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ScheduledStore`] applies the scheduler to every call of a raw store.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Operation kinds and the conflict table.
pub mod kind;

/// Ordered path index with ancestor and descendant queries.
pub mod path_index;

/// The operation scheduler.
///
/// This module provides:
/// - [`scheduler::OperationScheduler`]: dependency tracking and dispatch
/// - [`scheduler::SchedulerStats`]: counters
pub mod scheduler;

/// Raw store adapter routing calls through the scheduler.
pub mod store;

pub use kind::OperationKind;
pub use path_index::PathIndex;
pub use scheduler::{OperationScheduler, SchedulerStats};
pub use store::ScheduledStore;
