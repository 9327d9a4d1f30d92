//! # arbor-common
//!
//! Common types, errors, and utilities for ArborDB.
//!
//! This crate provides the foundational types shared by every ArborDB
//! component:
//!
//! - **Types**: hierarchical [`Identifier`] paths, [`Revision`] numbers and
//!   comparable property [`Value`]s
//! - **Errors**: unified error handling with [`ArborError`]
//! - **Codec**: the tagged binary encoding used for persisted node images
//! - **Config**: engine configuration structures
//! - **Constants**: system-wide defaults and reserved names
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::types::{Identifier, Revision};
//! use arbor_common::error::ArborResult;
//!
//! fn example() -> ArborResult<()> {
//!     let id = Identifier::parse("users/alice");
//!     assert_eq!(id.parent(), Some(Identifier::parse("users")));
//!     let rev = Revision::new(2);
//!     assert!(rev > Revision::INITIAL);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::ArborConfig;
pub use error::{ArborError, ArborResult, ErrorCode};
pub use types::{Identifier, Revision, Value};
