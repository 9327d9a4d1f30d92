//! # arbor-test
//!
//! Integration tests for ArborDB.
//!
//! This crate contains:
//! - A harness wiring executor, store, scheduler and repository together
//! - A store wrapper that injects I/O failures
//! - Seeded record workloads

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test harness and helpers
pub mod utils;

/// Failure injection
pub mod faults;

/// Workload generators
pub mod workload;
