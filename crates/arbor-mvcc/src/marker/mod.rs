//! Revision markers.
//!
//! Every write to an object is recorded as a child of the object's reserved
//! `~rev` segment instead of overwriting the object in place:
//!
//! ```text
//! a/b/~rev/store@00000000000000000002    (holds the bytes written at r2)
//! a/b/~rev/delete@00000000000000000005   (a/b is absent from r5 on)
//! ```
//!
//! Zero padding keeps the raw store's child order equal to revision order.

use std::fmt;

use arbor_common::constants::{COMMIT_LOG_SEGMENT, REVISION_SEGMENT};
use arbor_common::types::{Identifier, Revision};

/// The operation a marker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// The object was stored; the marker holds its bytes.
    Store,
    /// The object was deleted.
    Delete,
}

impl MarkerKind {
    /// Returns the marker name prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MarkerKind::Store => "store",
            MarkerKind::Delete => "delete",
        }
    }

    /// Returns the other kind.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            MarkerKind::Store => MarkerKind::Delete,
            MarkerKind::Delete => MarkerKind::Store,
        }
    }
}

/// A parsed revision marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevisionMarker {
    /// What happened.
    pub kind: MarkerKind,
    /// The revision it happened at.
    pub revision: Revision,
}

impl RevisionMarker {
    /// Creates a marker.
    #[must_use]
    pub const fn new(kind: MarkerKind, revision: Revision) -> Self {
        Self { kind, revision }
    }

    /// Returns the marker's segment name, e.g. `store@00000000000000000002`.
    #[must_use]
    pub fn segment(&self) -> String {
        format!("{}@{}", self.kind.as_str(), self.revision.to_padded())
    }

    /// Parses a marker segment name. Returns `None` for anything else.
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        let (kind, revision) = segment.split_once('@')?;
        let kind = match kind {
            "store" => MarkerKind::Store,
            "delete" => MarkerKind::Delete,
            _ => return None,
        };
        Some(Self::new(kind, Revision::parse_padded(revision)?))
    }

    /// Returns the full path of this marker for `object`.
    #[must_use]
    pub fn path_for(&self, object: &Identifier) -> Identifier {
        revision_dir(object).child(self.segment())
    }

    /// Returns true for a store marker.
    #[inline]
    #[must_use]
    pub fn is_store(&self) -> bool {
        self.kind == MarkerKind::Store
    }
}

impl fmt::Display for RevisionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind.as_str(), self.revision)
    }
}

/// Returns the directory holding the markers of `object`.
#[must_use]
pub fn revision_dir(object: &Identifier) -> Identifier {
    object.child(REVISION_SEGMENT)
}

/// Returns true if `path` lies in a reserved area: a revision directory or
/// the commit log.
#[must_use]
pub fn is_reserved(path: &Identifier) -> bool {
    path.segments().first().is_some_and(|s| s == COMMIT_LOG_SEGMENT)
        || path.segments().iter().any(|s| s == REVISION_SEGMENT)
}

/// Picks the winning marker: the highest revision among those `visible`
/// accepts.
pub fn resolve<I, F>(markers: I, visible: F) -> Option<RevisionMarker>
where
    I: IntoIterator<Item = RevisionMarker>,
    F: Fn(Revision) -> bool,
{
    markers
        .into_iter()
        .filter(|m| visible(m.revision))
        .max_by_key(|m| (m.revision, m.kind == MarkerKind::Delete))
}
