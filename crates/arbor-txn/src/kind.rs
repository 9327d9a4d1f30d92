//! Operation kinds.
//!
//! # Conflict Table
//!
//! An incoming operation (row) waits on a pending operation at the same path
//! (column) when marked:
//!
//! ```text
//!          │ READ │ WRITE │ DELETE │ LIST │ CREATE │
//! ─────────┼──────┼───────┼────────┼──────┼────────┤
//!   READ   │      │   ✓   │   ✓    │      │        │
//!   WRITE  │  ✓   │   ✓   │   ✓    │      │   ✓    │
//!   DELETE │  ✓   │   ✓   │   ✓    │  ✓   │        │
//!   LIST   │      │   ✓   │   ✓    │      │   ✓    │
//!   CREATE │  ✓   │   ✓   │   ✓    │  ✓   │        │
//! ```
//!
//! CREATE never waits on another CREATE: create-if-absent arbitrates
//! "first writer wins" itself.

use std::fmt;

/// The kind of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fetch an object.
    Read,
    /// Store an object.
    Write,
    /// Delete an object and its subtree.
    Delete,
    /// Enumerate children.
    List,
    /// Create-if-absent.
    Create,
}

impl OperationKind {
    /// All kinds, in table order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::Delete,
        OperationKind::List,
        OperationKind::Create,
    ];

    /// Returns true if an incoming `self` must wait on a pending `pending`
    /// at the same path.
    #[must_use]
    pub fn waits_on(self, pending: OperationKind) -> bool {
        use OperationKind::*;
        matches!(
            (self, pending),
            (Read, Write | Delete)
                | (Write, Read | Write | Delete | Create)
                | (Delete, Read | Write | Delete | List)
                | (List, Write | Delete | Create)
                | (Create, Read | Write | Delete | List)
        )
    }

    /// Returns true if the operation also depends on activity anywhere below
    /// its path.
    #[inline]
    #[must_use]
    pub fn covers_subtree(self) -> bool {
        matches!(self, OperationKind::List | OperationKind::Delete)
    }

    /// Returns true if the operation modifies the namespace.
    #[inline]
    #[must_use]
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::Write | OperationKind::Delete | OperationKind::Create
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => write!(f, "READ"),
            OperationKind::Write => write!(f, "WRITE"),
            OperationKind::Delete => write!(f, "DELETE"),
            OperationKind::List => write!(f, "LIST"),
            OperationKind::Create => write!(f, "CREATE"),
        }
    }
}
