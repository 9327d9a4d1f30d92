//! Predicate evaluation over property indices.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Identifier, Value};
use arbor_exec::{Executor, Promise};
use arbor_store::ObjectStore;
use arbor_txn::OperationScheduler;
use dashmap::DashMap;

use crate::cursor::{ConjunctiveCursor, DisjunctiveCursor, IdCursor, IdentifierStream};
use crate::predicate::{CompareOp, Predicate, Quantifier, Record};
use crate::property::PropertyIndex;

/// Searcher statistics.
#[derive(Debug, Default)]
pub struct SearchStats {
    queries: AtomicU64,
    postings_added: AtomicU64,
    postings_removed: AtomicU64,
}

impl SearchStats {
    /// Queries compiled.
    pub fn queries(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    /// Postings added by [`IndexSearcher::index`].
    pub fn postings_added(&self) -> u64 {
        self.postings_added.load(AtomicOrdering::Relaxed)
    }

    /// Postings removed by [`IndexSearcher::unindex`].
    pub fn postings_removed(&self) -> u64 {
        self.postings_removed.load(AtomicOrdering::Relaxed)
    }
}

/// Finds the identifiers matching a predicate using the property indices
/// stored under one base path.
pub struct IndexSearcher {
    store: Arc<dyn ObjectStore>,
    scheduler: OperationScheduler,
    base: Identifier,
    page_size: usize,
    indices: DashMap<String, PropertyIndex>,
    stats: SearchStats,
}

fn check_property(property: &str) -> ArborResult<()> {
    if property.is_empty() || property.contains('/') || property.starts_with('~') {
        return Err(ArborError::invalid_config(format!(
            "unusable property name '{property}'"
        )));
    }
    Ok(())
}

impl IndexSearcher {
    /// Creates a searcher for indices stored below `base`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        base: Identifier,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            scheduler,
            base,
            page_size,
            indices: DashMap::new(),
            stats: SearchStats::default(),
        }
    }

    fn executor(&self) -> &Executor {
        self.scheduler.executor()
    }

    /// Returns the searcher statistics.
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Creates an empty index of `property`.
    pub fn create_index(&self, property: &str) -> ArborResult<PropertyIndex> {
        check_property(property)?;
        if self.indices.contains_key(property) {
            return Err(ArborError::invalid_state(format!(
                "property '{property}' is already indexed"
            )));
        }
        let index = PropertyIndex::create(
            Arc::clone(&self.store),
            self.scheduler.clone(),
            self.base.child(property),
            property,
            self.page_size,
        )
        .wait(self.executor())?;
        self.indices.insert(property.to_string(), index.clone());
        tracing::debug!(property, base = %self.base, "created index");
        Ok(index)
    }

    /// Opens the stored index of `property`.
    pub fn open_index(&self, property: &str) -> ArborResult<PropertyIndex> {
        check_property(property)?;
        if let Some(index) = self.indices.get(property) {
            return Ok(index.clone());
        }
        let index = PropertyIndex::open(
            Arc::clone(&self.store),
            self.scheduler.clone(),
            self.base.child(property),
            property,
        )
        .wait(self.executor())?;
        let index = self
            .indices
            .entry(property.to_string())
            .or_insert(index)
            .clone();
        Ok(index)
    }

    /// Returns the properties with an index, sorted.
    pub fn indexed_properties(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn index_for(&self, property: &str) -> ArborResult<PropertyIndex> {
        self.indices
            .get(property)
            .map(|e| e.value().clone())
            .ok_or_else(|| ArborError::missing_index(property))
    }

    fn apply<F>(&self, records: &[Record], op: F) -> ArborResult<u64>
    where
        F: Fn(&PropertyIndex, Value, Identifier) -> Promise<bool>,
    {
        let mut pending = Vec::new();
        for record in records {
            for (property, values) in &record.properties {
                // Clone the handle out so no map guard is held while waiting.
                let Some(index) = self.indices.get(property).map(|e| e.value().clone()) else {
                    continue;
                };
                for value in values {
                    pending.push(op(&index, value.clone(), record.id.clone()));
                }
            }
        }
        let changed = Promise::all(pending).wait(self.executor())?;
        Ok(changed.into_iter().filter(|c| *c).count() as u64)
    }

    /// Adds postings for every indexed property the records carry. Yields
    /// the number of postings that were not recorded before.
    pub fn index(&self, records: &[Record]) -> ArborResult<u64> {
        let added = self.apply(records, |index, value, id| index.add(value, id))?;
        self.stats
            .postings_added
            .fetch_add(added, AtomicOrdering::Relaxed);
        Ok(added)
    }

    /// Removes the postings of the records. Yields the number removed.
    pub fn unindex(&self, records: &[Record]) -> ArborResult<u64> {
        let removed = self.apply(records, |index, value, id| index.remove(value, id))?;
        self.stats
            .postings_removed
            .fetch_add(removed, AtomicOrdering::Relaxed);
        Ok(removed)
    }

    /// Lazily enumerates the identifiers matching `predicate`, ascending.
    pub fn fetch_identifiers(&self, predicate: &Predicate) -> ArborResult<IdentifierStream> {
        let cursor = self.compile(predicate)?;
        self.stats.queries.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(IdentifierStream::new(cursor))
    }

    fn compile(&self, predicate: &Predicate) -> ArborResult<Box<dyn IdCursor>> {
        match predicate {
            Predicate::And(parts) => {
                if parts.is_empty() {
                    return Err(ArborError::unsupported("empty conjunction"));
                }
                let operands = self.compile_all(parts)?;
                Ok(Box::new(ConjunctiveCursor::new(operands)?))
            }
            Predicate::Or(parts) => Ok(Box::new(DisjunctiveCursor::new(self.compile_all(parts)?))),
            Predicate::Compare {
                property,
                op,
                values,
                quantifier,
            } => self.compile_comparison(property, *op, values, *quantifier),
        }
    }

    fn compile_all(&self, parts: &[Predicate]) -> ArborResult<Vec<Box<dyn IdCursor>>> {
        parts.iter().map(|p| self.compile(p)).collect()
    }

    fn compile_comparison(
        &self,
        property: &str,
        op: CompareOp,
        values: &[Value],
        quantifier: Quantifier,
    ) -> ArborResult<Box<dyn IdCursor>> {
        if op == CompareOp::Like {
            return Err(ArborError::unsupported(format!("{op} on property '{property}'")));
        }
        if values.is_empty() {
            return Err(ArborError::unsupported(format!(
                "{op} on property '{property}' without values"
            )));
        }
        let index = self.index_for(property)?;
        tracing::trace!(property, %op, values = values.len(), ?quantifier, "compiling comparison");

        let mut operands: Vec<Box<dyn IdCursor>> = values
            .iter()
            .map(|value| match op {
                CompareOp::Eq => index.equal_cursor(value),
                CompareOp::NotEq => index.not_equal_cursor(value),
                _ => index.range_cursor(op, value),
            })
            .collect::<ArborResult<_>>()?;
        if operands.len() == 1 {
            return Ok(operands.remove(0));
        }
        Ok(match quantifier {
            Quantifier::All => Box::new(ConjunctiveCursor::new(operands)?),
            Quantifier::Some => Box::new(DisjunctiveCursor::new(operands)),
        })
    }
}

impl std::fmt::Debug for IndexSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSearcher")
            .field("base", &self.base)
            .field("indices", &self.indexed_properties())
            .finish()
    }
}
