//! Identifier cursors.
//!
//! Every cursor walks an ascending, duplicate-free sequence of identifiers.
//! Cursors are positioned on their first identifier when built, so
//! [`IdCursor::key`] is meaningful right away.
//!
//! ```text
//!   Predicate::And ──▶ ConjunctiveCursor ─┬─▶ posting cursor  (=)
//!                                         └─▶ DisjunctiveCursor (range: union of postings)
//! ```

mod algebra;

pub use algebra::{ConjunctiveCursor, DisjunctiveCursor};

use arbor_btree::{Cursor, Direction};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::Identifier;

/// An ascending stream of identifiers that can skip ahead.
pub trait IdCursor: Send {
    /// Returns the current identifier, or `None` once exhausted.
    fn key(&self) -> Option<&Identifier>;

    /// Moves past the current identifier. Returns false once exhausted.
    fn advance(&mut self) -> ArborResult<bool>;

    /// Moves to the first identifier `>= target`. Never moves backwards.
    /// Returns false once exhausted.
    fn seek(&mut self, target: &Identifier) -> ArborResult<bool>;
}

/// Cursor over identifiers held in memory.
#[derive(Debug, Clone, Default)]
pub struct ListCursor {
    ids: Vec<Identifier>,
    pos: usize,
}

impl ListCursor {
    /// Sorts and deduplicates `ids`.
    #[must_use]
    pub fn new(mut ids: Vec<Identifier>) -> Self {
        ids.sort();
        ids.dedup();
        Self { ids, pos: 0 }
    }

    /// A cursor over nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl IdCursor for ListCursor {
    fn key(&self) -> Option<&Identifier> {
        self.ids.get(self.pos)
    }

    fn advance(&mut self) -> ArborResult<bool> {
        self.pos = (self.pos + 1).min(self.ids.len());
        Ok(self.pos < self.ids.len())
    }

    fn seek(&mut self, target: &Identifier) -> ArborResult<bool> {
        let rest = &self.ids[self.pos..];
        self.pos += rest.partition_point(|id| id < target);
        Ok(self.pos < self.ids.len())
    }
}

/// Cursor over the identifiers of a satellite set tree.
pub struct SetCursor {
    inner: Cursor<Identifier, ()>,
}

impl SetCursor {
    /// Wraps a forward tree cursor and positions it on the first entry.
    pub fn new(mut inner: Cursor<Identifier, ()>) -> ArborResult<Self> {
        if inner.direction() != Direction::Forward {
            return Err(ArborError::internal("set cursors walk forward"));
        }
        inner.first()?;
        Ok(Self { inner })
    }
}

impl IdCursor for SetCursor {
    fn key(&self) -> Option<&Identifier> {
        self.inner.key()
    }

    fn advance(&mut self) -> ArborResult<bool> {
        self.inner.next()
    }

    fn seek(&mut self, target: &Identifier) -> ArborResult<bool> {
        match self.inner.key() {
            None => Ok(false),
            Some(current) if current >= target => Ok(true),
            Some(_) => self.inner.to(target),
        }
    }
}

impl std::fmt::Debug for SetCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetCursor").field("key", &self.key()).finish()
    }
}

/// Lazy sequence of the identifiers matched by a query.
///
/// Yields each identifier once, ascending. After an error the stream ends.
pub struct IdentifierStream {
    cursor: Box<dyn IdCursor>,
    started: bool,
    done: bool,
}

impl IdentifierStream {
    /// Wraps a positioned cursor.
    #[must_use]
    pub fn new(cursor: Box<dyn IdCursor>) -> Self {
        Self {
            cursor,
            started: false,
            done: false,
        }
    }

    /// Drains the stream, stopping at the first error.
    pub fn collect_all(self) -> ArborResult<Vec<Identifier>> {
        self.collect()
    }
}

impl Iterator for IdentifierStream {
    type Item = ArborResult<Identifier>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.started {
            if let Err(e) = self.cursor.advance() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.started = true;
        let key = self.cursor.key().cloned();
        self.done = key.is_none();
        key.map(Ok)
    }
}

impl std::fmt::Debug for IdentifierStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierStream")
            .field("key", &self.cursor.key())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ids(names: &[&str]) -> Vec<Identifier> {
        names.iter().map(|n| Identifier::parse(n)).collect()
    }

    pub(crate) fn list(names: &[&str]) -> Box<dyn IdCursor> {
        Box::new(ListCursor::new(ids(names)))
    }

    #[test]
    fn test_list_cursor_seek() {
        let mut cursor = ListCursor::new(ids(&["c", "a", "e", "a"]));
        assert_eq!(cursor.key(), Some(&Identifier::parse("a")));
        assert!(cursor.seek(&Identifier::parse("b")).unwrap());
        assert_eq!(cursor.key(), Some(&Identifier::parse("c")));
        // Seeking backwards stays put.
        assert!(cursor.seek(&Identifier::parse("a")).unwrap());
        assert_eq!(cursor.key(), Some(&Identifier::parse("c")));
        assert!(cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
        assert_eq!(cursor.key(), None);
    }

    #[test]
    fn test_stream_yields_each_identifier_once() {
        let stream = IdentifierStream::new(list(&["b", "a", "c"]));
        assert_eq!(stream.collect_all().unwrap(), ids(&["a", "b", "c"]));
        let mut empty = IdentifierStream::new(Box::new(ListCursor::empty()));
        assert!(empty.next().is_none());
        assert!(empty.next().is_none());
    }

    struct Failing;

    impl IdCursor for Failing {
        fn key(&self) -> Option<&Identifier> {
            None
        }

        fn advance(&mut self) -> ArborResult<bool> {
            Err(ArborError::corruption("bad node"))
        }

        fn seek(&mut self, _: &Identifier) -> ArborResult<bool> {
            Err(ArborError::corruption("bad node"))
        }
    }

    #[test]
    fn test_stream_stops_after_error() {
        let mut stream = IdentifierStream {
            cursor: Box::new(Failing),
            started: true,
            done: false,
        };
        assert!(matches!(stream.next(), Some(Err(ArborError::Corruption { .. }))));
        assert!(stream.next().is_none());
    }
}
