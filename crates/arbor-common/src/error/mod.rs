//! Error handling for ArborDB.
//!
//! This module provides a unified error type and result alias used
//! across all ArborDB components.

mod arbor;

pub use arbor::{ArborError, ErrorCode};

/// Result type alias for ArborDB operations.
pub type ArborResult<T> = std::result::Result<T, ArborError>;
