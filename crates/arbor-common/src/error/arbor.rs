//! Engine error types.
//!
//! Every layer of the engine reports failures through [`ArborError`]. Errors
//! are cheaply cloneable because one failure may have to reach every
//! continuation and dependent operation chained onto it.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{Identifier, Revision};

/// Numeric code of an [`ArborError`].
///
/// Codes are grouped by range per category; callers may match on them
/// instead of on error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    UnsupportedOperation = 0x0002,
    /// Invalid configuration or argument.
    InvalidArgument = 0x0003,
    /// Operation was cancelled.
    Cancelled = 0x0005,

    // I/O errors (0x0100 - 0x01FF)
    /// Error reported by the raw store.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0104,
    /// Store or session already closed.
    Closed = 0x0105,

    // Storage errors (0x0200 - 0x02FF)
    /// Object not found.
    NotFound = 0x0203,

    // Transaction errors (0x0300 - 0x03FF)
    /// Commit conflicted with a concurrent committer.
    ConflictingCommit = 0x0301,
    /// Session is not in a state that allows the operation.
    InvalidState = 0x0306,

    // Query errors (0x0600 - 0x06FF)
    /// Predicate references an unindexed property.
    MissingIndex = 0x0601,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Storage",
            0x03 => "Transaction",
            0x06 => "Query",
            _ => "Unknown",
        }
    }

    /// Returns true if the failed work may succeed when retried from scratch.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ConflictingCommit)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for ArborDB.
///
/// # Example
///
/// ```rust
/// use arbor_common::error::{ArborError, ArborResult, ErrorCode};
///
/// fn read_only_write() -> ArborResult<()> {
///     Err(ArborError::unsupported("store on a read-only session"))
/// }
///
/// let err = read_only_write().unwrap_err();
/// assert_eq!(err.code(), ErrorCode::UnsupportedOperation);
/// ```
#[derive(Debug, Clone, Error)]
pub enum ArborError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// A broken internal invariant.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported (write on a read-only session, an operator the
    /// index layer cannot evaluate, ...).
    #[error("operation not supported: {operation}")]
    UnsupportedOperation {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Operation was cancelled. This is an outcome, not a failure: dependents
    /// of a cancelled operation proceed normally.
    #[error("operation was cancelled")]
    Cancelled,

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error reported by the raw store, propagated unchanged.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Data corruption detected (codec tag mismatch, malformed node image).
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The store or session was already closed.
    #[error("{what} is closed")]
    Closed {
        /// What was closed.
        what: String,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// A required object does not exist.
    #[error("object {path} not found")]
    NotFound {
        /// The missing object.
        path: Identifier,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// A concurrent committer invalidated this session's read or write set.
    /// The whole transaction must be retried in a new session.
    #[error("revision {revision} conflicts with a concurrent commit at {path}")]
    ConflictingCommit {
        /// Revision of the session that failed to commit.
        revision: Revision,
        /// First overlapping path found.
        path: Identifier,
    },

    /// The session is not in a state that allows the operation.
    #[error("invalid session state: {message}")]
    InvalidState {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    /// A predicate references a property that has no index.
    #[error("no index for property '{property}'")]
    MissingIndex {
        /// The unindexed property.
        property: String,
    },
}

impl ArborError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            Self::InvalidConfig { .. } => ErrorCode::InvalidArgument,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::Closed { .. } => ErrorCode::Closed,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::ConflictingCommit { .. } => ErrorCode::ConflictingCommit,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::MissingIndex { .. } => ErrorCode::MissingIndex,
        }
    }

    /// Returns true if this error is a cancellation outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if retrying the whole transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a closed error.
    #[must_use]
    pub fn closed(what: impl Into<String>) -> Self {
        Self::Closed { what: what.into() }
    }

    /// Creates a missing index error.
    #[must_use]
    pub fn missing_index(property: impl Into<String>) -> Self {
        Self::MissingIndex {
            property: property.into(),
        }
    }
}

impl From<std::io::Error> for ArborError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}
