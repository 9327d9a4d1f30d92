//! Revision numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::REVISION_DIGITS;

/// A revision number marking a transactional snapshot.
///
/// Read-write sessions reserve a fresh revision when they begin; the revision
/// becomes visible to later sessions only once it commits. Numbers are never
/// reused, even when the reserving session rolls back.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Revision;
///
/// let rev = Revision::new(7);
/// assert_eq!(rev.next(), Revision::new(8));
/// assert_eq!(Revision::parse_padded(&rev.to_padded()), Some(rev));
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision of an empty repository; nothing is ever written at it.
    pub const INITIAL: Self = Self(0);

    /// Creates a revision from a raw number.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw number.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following revision.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Formats the revision zero-padded so that string order matches numeric
    /// order.
    #[must_use]
    pub fn to_padded(self) -> String {
        format!("{:0width$}", self.0, width = REVISION_DIGITS)
    }

    /// Parses a revision produced by [`Revision::to_padded`].
    #[must_use]
    pub fn parse_padded(text: &str) -> Option<Self> {
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse().ok().map(Self)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_order_matches_numeric_order() {
        let a = Revision::new(9).to_padded();
        let b = Revision::new(10).to_padded();
        assert!(a < b);
        assert_eq!(a.len(), REVISION_DIGITS);
    }

    #[test]
    fn test_parse_padded_rejects_garbage() {
        assert_eq!(Revision::parse_padded("00042"), Some(Revision::new(42)));
        assert_eq!(Revision::parse_padded(""), None);
        assert_eq!(Revision::parse_padded("12a"), None);
        assert_eq!(Revision::parse_padded("-1"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Revision::new(3).to_string(), "r3");
        assert_eq!(format!("{:?}", Revision::INITIAL), "Revision(0)");
    }
}
