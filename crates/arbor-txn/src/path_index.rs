//! Path-prefix index.
//!
//! Entries are kept in an ordered map keyed by [`Identifier`]. Ancestors are
//! found by probing each prefix of a path; descendants form the contiguous key
//! range that follows the path itself.

use std::collections::BTreeMap;
use std::ops::Bound;

use arbor_common::types::Identifier;

/// A multimap from paths to values supporting hierarchy queries.
///
/// Values at one path keep their insertion order.
#[derive(Debug, Clone)]
pub struct PathIndex<V> {
    entries: BTreeMap<Identifier, Vec<V>>,
    len: usize,
}

impl<V> Default for PathIndex<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            len: 0,
        }
    }
}

impl<V> PathIndex<V> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `value` at `path`.
    pub fn insert(&mut self, path: Identifier, value: V) {
        self.entries.entry(path).or_default().push(value);
        self.len += 1;
    }

    /// Removes the first value at `path` matching `pred`.
    pub fn remove_where<F>(&mut self, path: &Identifier, pred: F) -> Option<V>
    where
        F: Fn(&V) -> bool,
    {
        let values = self.entries.get_mut(path)?;
        let pos = values.iter().position(pred)?;
        let value = values.remove(pos);
        if values.is_empty() {
            self.entries.remove(path);
        }
        self.len -= 1;
        Some(value)
    }

    /// Returns the values registered exactly at `path`.
    #[must_use]
    pub fn at(&self, path: &Identifier) -> &[V] {
        self.entries.get(path).map_or(&[], Vec::as_slice)
    }

    /// Iterates over entries at proper ancestors of `path`, nearest first.
    pub fn ancestors_of<'a>(
        &'a self,
        path: &'a Identifier,
    ) -> impl Iterator<Item = (Identifier, &'a [V])> + 'a {
        path.ancestors().filter_map(move |ancestor| {
            let values = self.entries.get(&ancestor)?;
            Some((ancestor, values.as_slice()))
        })
    }

    /// Iterates over entries at proper descendants of `path`, ascending.
    pub fn descendants_of<'a>(
        &'a self,
        path: &'a Identifier,
    ) -> impl Iterator<Item = (&'a Identifier, &'a [V])> + 'a {
        self.entries
            .range((Bound::Excluded(path.clone()), Bound::Unbounded))
            .take_while(move |(k, _)| k.is_descendant_of(path))
            .map(|(k, v)| (k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(path: &str) -> Identifier {
        Identifier::parse(path)
    }

    fn sample() -> PathIndex<u32> {
        let mut index = PathIndex::new();
        for (n, path) in ["a", "a/b", "a/b/c", "a/bz", "ab", "b"].iter().enumerate() {
            index.insert(id(path), n as u32);
        }
        index.insert(id("a/b"), 99);
        index
    }

    #[test]
    fn test_at_keeps_insertion_order() {
        let index = sample();
        assert_eq!(index.at(&id("a/b")), &[1, 99]);
        assert!(index.at(&id("zzz")).is_empty());
        assert_eq!(index.len(), 7);
    }

    #[test]
    fn test_ancestors() {
        let index = sample();
        let found: Vec<_> = index
            .ancestors_of(&id("a/b/c/d"))
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(found, vec!["a/b/c", "a/b", "a"]);
    }

    #[test]
    fn test_descendants_exclude_siblings_with_shared_prefix() {
        let index = sample();
        let found: Vec<_> = index
            .descendants_of(&id("a"))
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(found, vec!["a/b", "a/b/c", "a/bz"]);

        let root = Identifier::root();
        let all: Vec<_> = index.descendants_of(&root).collect();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn test_remove_where() {
        let mut index = sample();
        assert_eq!(index.remove_where(&id("a/b"), |v| *v == 99), Some(99));
        assert_eq!(index.remove_where(&id("a/b"), |v| *v == 99), None);
        assert_eq!(index.remove_where(&id("ab"), |_| true), Some(4));
        assert!(index.at(&id("ab")).is_empty());
        assert_eq!(index.len(), 5);
    }
}
