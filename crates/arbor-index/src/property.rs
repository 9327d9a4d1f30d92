//! Ordered index of one property.
//!
//! ```text
//!   <path>/values        B+Tree: Value -> Posting
//!   <path>/sets/<hex>    B+Tree: Identifier -> ()   (one per shared value)
//! ```
//!
//! A value carried by one object maps straight to its identifier. When a
//! second object takes the value, the posting turns into a satellite set;
//! when only one is left, it turns back.

use std::fmt::Write as _;
use std::sync::Arc;

use arbor_btree::{BTree, Direction};
use arbor_common::codec;
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Identifier, Value};
use arbor_exec::{Executor, Promise};
use arbor_store::ObjectStore;
use arbor_txn::{OperationKind, OperationScheduler};

use crate::cursor::{DisjunctiveCursor, IdCursor, ListCursor, SetCursor};
use crate::posting::Posting;
use crate::predicate::CompareOp;

const VALUES_SEGMENT: &str = "values";
const SETS_SEGMENT: &str = "sets";

struct IndexInner {
    property: String,
    path: Identifier,
    page_size: usize,
    values: BTree<Value, Posting>,
    store: Arc<dyn ObjectStore>,
    scheduler: OperationScheduler,
}

/// Index of one property's values.
#[derive(Clone)]
pub struct PropertyIndex {
    inner: Arc<IndexInner>,
}

impl IndexInner {
    fn executor(&self) -> &Executor {
        self.scheduler.executor()
    }

    fn wait<T: Clone + Send + 'static>(&self, promise: Promise<T>) -> ArborResult<T> {
        promise.wait(self.executor())
    }

    fn set_path(&self, value: &Value) -> Identifier {
        let image = codec::to_bytes(value);
        let mut name = String::with_capacity(image.len() * 2);
        for byte in image.iter() {
            let _ = write!(name, "{byte:02x}");
        }
        self.path.child(SETS_SEGMENT).child(name)
    }

    fn open_set(&self, path: &Identifier) -> ArborResult<BTree<Identifier, ()>> {
        self.wait(BTree::open(
            Arc::clone(&self.store),
            self.scheduler.clone(),
            path.clone(),
        ))
    }

    fn add(&self, value: Value, id: Identifier) -> ArborResult<bool> {
        match self.wait(self.values.get(&value))? {
            None => {
                self.wait(self.values.insert(value, Posting::Single(id)))?;
                Ok(true)
            }
            Some(Posting::Single(existing)) if existing == id => Ok(false),
            Some(Posting::Single(existing)) => {
                let path = self.set_path(&value);
                let set = self.wait(BTree::create_instance(
                    Arc::clone(&self.store),
                    self.scheduler.clone(),
                    path.clone(),
                    self.page_size,
                ))?;
                self.wait(set.insert(existing, ()))?;
                self.wait(set.insert(id, ()))?;
                self.wait(self.values.insert(value, Posting::Set(path)))?;
                tracing::trace!(property = %self.property, "posting became a set");
                Ok(true)
            }
            Some(Posting::Set(path)) => {
                let set = self.open_set(&path)?;
                Ok(self.wait(set.insert(id, ()))?.is_none())
            }
        }
    }

    fn remove(&self, value: Value, id: Identifier) -> ArborResult<bool> {
        match self.wait(self.values.get(&value))? {
            None => Ok(false),
            Some(Posting::Single(existing)) => {
                if existing != id {
                    return Ok(false);
                }
                self.wait(self.values.remove(value))?;
                Ok(true)
            }
            Some(Posting::Set(path)) => {
                let set = self.open_set(&path)?;
                if self.wait(set.remove(id))?.is_none() {
                    return Ok(false);
                }
                if self.wait(set.len())? > 1 {
                    return Ok(true);
                }
                let last = SetCursor::new(self.wait(set.cursor(Direction::Forward))?)?
                    .key()
                    .cloned();
                match last {
                    Some(last) => {
                        self.wait(self.values.insert(value, Posting::Single(last)))?;
                    }
                    None => {
                        self.wait(self.values.remove(value))?;
                    }
                }
                self.wait(set.delete())?;
                tracing::trace!(property = %self.property, "set collapsed to a single posting");
                Ok(true)
            }
        }
    }

    /// Waits for every update issued on this index so far.
    fn barrier(&self) -> ArborResult<()> {
        self.wait(
            self.scheduler
                .schedule(&self.path, OperationKind::Read, || Promise::ready(())),
        )
    }

    fn collect_postings(&self, value: &Value) -> ArborResult<Vec<Identifier>> {
        let Some(posting) = self.wait(self.values.get(value))? else {
            return Ok(Vec::new());
        };
        let mut cursor = self.posting_cursor(posting)?;
        let mut out = Vec::new();
        while let Some(id) = cursor.key() {
            out.push(id.clone());
            cursor.advance()?;
        }
        Ok(out)
    }

    fn posting_cursor(&self, posting: Posting) -> ArborResult<Box<dyn IdCursor>> {
        match posting {
            Posting::Single(id) => Ok(Box::new(ListCursor::new(vec![id]))),
            Posting::Set(path) => {
                let set = self.open_set(&path)?;
                let cursor = self.wait(set.cursor(Direction::Forward))?;
                Ok(Box::new(SetCursor::new(cursor)?))
            }
        }
    }
}

impl PropertyIndex {
    fn from_tree(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        path: Identifier,
        property: String,
        values: BTree<Value, Posting>,
    ) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                property,
                path,
                page_size: values.page_size(),
                values,
                store,
                scheduler,
            }),
        }
    }

    /// Creates an empty index of `property` at `path`.
    pub fn create(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        path: Identifier,
        property: impl Into<String>,
        page_size: usize,
    ) -> Promise<Self> {
        let property = property.into();
        let tree = BTree::create_instance(
            Arc::clone(&store),
            scheduler.clone(),
            path.child(VALUES_SEGMENT),
            page_size,
        );
        tree.map(move |values| Self::from_tree(store, scheduler, path, property, values))
    }

    /// Opens the index of `property` stored at `path`.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        path: Identifier,
        property: impl Into<String>,
    ) -> Promise<Self> {
        let property = property.into();
        let tree = BTree::open(
            Arc::clone(&store),
            scheduler.clone(),
            path.child(VALUES_SEGMENT),
        );
        tree.map(move |values| Self::from_tree(store, scheduler, path, property, values))
    }

    /// Returns the indexed property.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.inner.property
    }

    /// Returns where the index is stored.
    #[must_use]
    pub fn path(&self) -> &Identifier {
        &self.inner.path
    }

    fn update<F>(&self, f: F) -> Promise<bool>
    where
        F: FnOnce(&IndexInner) -> ArborResult<bool> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner
            .scheduler
            .schedule_update(&self.inner.path, move || Promise::settled(f(&inner)))
    }

    /// Records that `id` carries `value`. Yields false if it was recorded
    /// already.
    pub fn add(&self, value: Value, id: Identifier) -> Promise<bool> {
        self.update(move |inner| inner.add(value, id))
    }

    /// Forgets that `id` carries `value`. Yields false if it was not
    /// recorded.
    pub fn remove(&self, value: Value, id: Identifier) -> Promise<bool> {
        self.update(move |inner| inner.remove(value, id))
    }

    /// Yields the identifiers carrying `value`, ascending.
    pub fn postings(&self, value: &Value) -> Promise<Vec<Identifier>> {
        let inner = Arc::clone(&self.inner);
        let value = value.clone();
        self.inner
            .scheduler
            .schedule(&self.inner.path, OperationKind::Read, move || {
                let collected = inner.collect_postings(&value);
                Promise::settled(collected)
            })
    }

    /// Cursor over the identifiers carrying `value`.
    pub fn equal_cursor(&self, value: &Value) -> ArborResult<Box<dyn IdCursor>> {
        self.inner.barrier()?;
        match self.inner.wait(self.inner.values.get(value))? {
            Some(posting) => self.inner.posting_cursor(posting),
            None => Ok(Box::new(ListCursor::empty())),
        }
    }

    /// Cursor over the identifiers carrying a value `v` with `v op boundary`,
    /// for a range operator. Only values of the boundary's kind are covered.
    pub fn range_cursor(&self, op: CompareOp, boundary: &Value) -> ArborResult<Box<dyn IdCursor>> {
        if !op.is_range() {
            return Err(ArborError::unsupported(format!("range scan with {op}")));
        }
        self.inner.barrier()?;
        let direction = if op.is_descending() {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        let mut walk = self.inner.wait(self.inner.values.cursor(direction))?;
        let mut valid = walk.to(boundary)?;
        if valid && op.is_strict() && walk.key() == Some(boundary) {
            valid = walk.next()?;
        }

        let mut postings = Vec::new();
        while valid {
            match (walk.key(), walk.value()) {
                (Some(key), Some(posting)) if key.kind_rank() == boundary.kind_rank() => {
                    postings.push(posting.clone());
                }
                _ => break,
            }
            valid = walk.next()?;
        }
        tracing::trace!(
            property = %self.inner.property,
            %op,
            %boundary,
            values = postings.len(),
            "range scan"
        );

        let operands = postings
            .into_iter()
            .map(|p| self.inner.posting_cursor(p))
            .collect::<ArborResult<Vec<_>>>()?;
        Ok(Box::new(DisjunctiveCursor::new(operands)))
    }

    /// Cursor over the identifiers carrying a value of the boundary's kind
    /// other than `value`.
    pub fn not_equal_cursor(&self, value: &Value) -> ArborResult<Box<dyn IdCursor>> {
        let below = self.range_cursor(CompareOp::Lt, value)?;
        let above = self.range_cursor(CompareOp::Gt, value)?;
        Ok(Box::new(DisjunctiveCursor::new(vec![below, above])))
    }

    /// Yields the number of distinct values.
    pub fn distinct_values(&self) -> Promise<u64> {
        self.inner.values.len()
    }
}

impl std::fmt::Debug for PropertyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyIndex")
            .field("property", &self.inner.property)
            .field("path", &self.inner.path)
            .finish()
    }
}
