//! Core types for ArborDB.
//!
//! This module contains the fundamental types used throughout ArborDB:
//!
//! - [`Identifier`]: hierarchical object paths, also used as sort keys
//! - [`Revision`]: transactional snapshot numbers
//! - [`Value`]: totally ordered property values

mod identifier;
mod revision;
mod value;

pub use identifier::Identifier;
pub use revision::Revision;
pub use value::Value;
