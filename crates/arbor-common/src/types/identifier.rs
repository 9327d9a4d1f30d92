//! Hierarchical object identifiers.
//!
//! An [`Identifier`] is an immutable path of segments. It is both the address
//! of an object in the namespace and its sort key: identifiers compare
//! segment by segment, so a parent sorts before its children and every
//! descendant of a path sorts contiguously right after it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::PATH_SEPARATOR;

/// An immutable hierarchical path.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Identifier;
///
/// let parent = Identifier::parse("a/b");
/// let child = parent.child("c");
/// assert!(parent.is_ancestor_of(&child));
/// assert_eq!(child.to_string(), "a/b/c");
/// assert!(parent < child);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Identifier {
    segments: Vec<String>,
}

impl Identifier {
    /// Returns the root identifier (no segments).
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a `/`-separated path. Empty segments are ignored, so `"/a//b/"`
    /// and `"a/b"` are the same identifier.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(PATH_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Builds an identifier from explicit segments.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the segments of this path.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root identifier.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the last segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Derives the child identifier with one more segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment.into());
        Self { segments }
    }

    /// Derives the parent identifier, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.prefix(self.segments.len() - 1))
    }

    /// Returns the ancestor made of the first `len` segments.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Iterates over all proper ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Identifier> + '_ {
        (0..self.segments.len()).rev().map(move |len| self.prefix(len))
    }

    /// Returns true if `self` is a proper ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Identifier) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Returns true if `self` is a proper descendant of `other`.
    #[inline]
    #[must_use]
    pub fn is_descendant_of(&self, other: &Identifier) -> bool {
        other.is_ancestor_of(self)
    }

    /// Returns true if `self` equals `other` or lies below it.
    #[inline]
    #[must_use]
    pub fn is_within(&self, other: &Identifier) -> bool {
        self == other || other.is_ancestor_of(self)
    }

    /// Returns the child of `self` on the way down to `descendant`.
    #[must_use]
    pub fn child_towards(&self, descendant: &Identifier) -> Option<Identifier> {
        if !self.is_ancestor_of(descendant) {
            return None;
        }
        Some(descendant.prefix(self.segments.len() + 1))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{PATH_SEPARATOR}");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{PATH_SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl From<&str> for Identifier {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}
