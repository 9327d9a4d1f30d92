//! The persistent B+Tree.
//!
//! Every operation is scheduled on the tree's identifier: mutations as
//! read-modify-write updates, lookups and cursors as READs. Operations on
//! one tree therefore run one mutation at a time, in call order, while
//! different trees proceed in parallel.
//!
//! Node images are read from and written to the tree's store directly. Give
//! the tree a storage session or a raw store, not a store that routes
//! through the tree's own scheduler.
//!
//! A mutation rewrites nodes in place and publishes the header last. If a
//! write fails after another one landed, the handle refuses every later
//! call. Inside a storage session the partial writes are only markers of
//! that session: close it and open the tree again from a new one. Over a raw
//! store they stay, so a tree is crash-consistent only inside a session.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use arbor_common::codec;
use arbor_common::constants::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::Identifier;
use arbor_exec::{Executor, Promise};
use arbor_store::ObjectStore;
use arbor_txn::{OperationKind, OperationScheduler};
use parking_lot::Mutex;

use crate::cursor::{Cursor, Direction};
use crate::node::{index_of, Node, NodeId, TreeHeader, TreeKey, TreeValue};

/// Statistics about the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Node splits.
    pub splits: u64,
    /// Sibling merges.
    pub merges: u64,
    /// Entries borrowed from a sibling to fix an underflow.
    pub borrows: u64,
    /// Node images read.
    pub node_loads: u64,
    /// Node images written.
    pub node_stores: u64,
}

#[derive(Debug, Default)]
struct Counters {
    splits: AtomicU64,
    merges: AtomicU64,
    borrows: AtomicU64,
    node_loads: AtomicU64,
    node_stores: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn snapshot(&self) -> TreeStats {
        TreeStats {
            splits: self.splits.load(AtomicOrdering::Relaxed),
            merges: self.merges.load(AtomicOrdering::Relaxed),
            borrows: self.borrows.load(AtomicOrdering::Relaxed),
            node_loads: self.node_loads.load(AtomicOrdering::Relaxed),
            node_stores: self.node_stores.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Summary of a validated tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    /// Levels above the leaves.
    pub height: u32,
    /// Leaf nodes.
    pub leaves: usize,
    /// Inner nodes.
    pub inner_nodes: usize,
    /// Entries across all leaves.
    pub entries: u64,
}

/// Result of inserting into a subtree.
struct Inserted<K, V> {
    previous: Option<V>,
    /// Largest key of the subtree after the insert.
    max: K,
    /// New right sibling and its largest key, if the node split.
    split: Option<(NodeId, K)>,
}

pub(crate) struct TreeCore<K, V> {
    store: Arc<dyn ObjectStore>,
    executor: Executor,
    id: Identifier,
    header: Mutex<TreeHeader>,
    deleted: AtomicBool,
    /// Set when a mutation failed after some of its writes landed.
    torn: AtomicBool,
    /// Successful writes of any kind.
    writes: AtomicU64,
    counters: Counters,
    _types: PhantomData<fn() -> (K, V)>,
}

fn max_of<K: TreeKey, V: TreeValue>(node: &Node<K, V>) -> ArborResult<K> {
    node.max_key()
        .cloned()
        .ok_or_else(|| ArborError::internal("empty node has no upper bound"))
}

impl<K: TreeKey, V: TreeValue> TreeCore<K, V> {
    fn wait<T: Clone + Send + 'static>(&self, promise: Promise<T>) -> ArborResult<T> {
        promise.wait(&self.executor)
    }

    pub(crate) fn load(&self, node: NodeId) -> ArborResult<Node<K, V>> {
        let path = node.path(&self.id);
        let bytes = self.wait(self.store.fetch(&path))?.ok_or_else(|| {
            ArborError::corruption(format!("tree {} is missing node {node}", self.id))
        })?;
        Counters::bump(&self.counters.node_loads);
        codec::from_bytes(&bytes)
    }

    fn save(&self, node_id: NodeId, node: &Node<K, V>) -> ArborResult<()> {
        self.wait(self.store.store(&node_id.path(&self.id), codec::to_bytes(node)))?;
        Counters::bump(&self.counters.node_stores);
        Counters::bump(&self.writes);
        Ok(())
    }

    fn discard(&self, node_id: NodeId) -> ArborResult<()> {
        self.wait(self.store.delete(&node_id.path(&self.id)))?;
        Counters::bump(&self.writes);
        Ok(())
    }

    pub(crate) fn header(&self) -> TreeHeader {
        *self.header.lock()
    }

    fn publish(&self, before: &TreeHeader, after: TreeHeader) -> ArborResult<()> {
        if *before != after {
            self.wait(self.store.store(&self.id, codec::to_bytes(&after)))?;
            Counters::bump(&self.writes);
            *self.header.lock() = after;
        }
        Ok(())
    }

    fn check_live(&self) -> ArborResult<()> {
        if self.deleted.load(AtomicOrdering::Acquire) {
            return Err(ArborError::invalid_state(format!("tree {} was deleted", self.id)));
        }
        if self.torn.load(AtomicOrdering::Acquire) {
            return Err(ArborError::invalid_state(format!(
                "tree {} was left partially updated by a failed mutation",
                self.id
            )));
        }
        Ok(())
    }

    /// Runs a mutation, marking the tree torn if it fails after writing.
    fn mutate<T>(&self, f: impl FnOnce(&Self) -> ArborResult<T>) -> ArborResult<T> {
        let writes = self.writes.load(AtomicOrdering::Acquire);
        let result = f(self);
        if let Err(e) = &result {
            if self.writes.load(AtomicOrdering::Acquire) != writes {
                tracing::warn!(tree = %self.id, error = %e, "mutation failed partway");
                self.torn.store(true, AtomicOrdering::Release);
            }
        }
        result
    }

    fn initialize(&self) -> ArborResult<()> {
        if self.wait(self.store.fetch(&self.id))?.is_some() {
            return Err(ArborError::invalid_state(format!("tree {} already exists", self.id)));
        }
        let header = self.header();
        self.save(header.root, &Node::empty_leaf())?;
        self.wait(self.store.store(&self.id, codec::to_bytes(&header)))?;
        tracing::debug!(tree = %self.id, page_size = header.page_size, "created tree");
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    fn get(&self, key: &K) -> ArborResult<Option<V>> {
        self.check_live()?;
        let mut node_id = self.header().root;
        loop {
            match self.load(node_id)? {
                Node::Inner { keys, children } => {
                    let slot = index_of(&keys, key);
                    if slot == keys.len() {
                        return Ok(None);
                    }
                    node_id = children[slot];
                }
                Node::Leaf { keys, mut values, .. } => {
                    let pos = index_of(&keys, key);
                    if pos < keys.len() && keys[pos] == *key {
                        return Ok(Some(values.swap_remove(pos)));
                    }
                    return Ok(None);
                }
            }
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    fn insert(&self, key: K, value: V) -> ArborResult<Option<V>> {
        self.check_live()?;
        let before = self.header();
        let mut header = before;
        let root = header.root;
        let outcome = self.insert_into(&mut header, root, key, value)?;
        if let Some((right, right_max)) = outcome.split {
            let new_root = header.allocate();
            let node: Node<K, V> = Node::Inner {
                keys: vec![outcome.max, right_max],
                children: vec![root, right],
            };
            self.save(new_root, &node)?;
            header.root = new_root;
            header.height += 1;
            tracing::debug!(tree = %self.id, height = header.height, "tree grew");
        }
        if outcome.previous.is_none() {
            header.len += 1;
        }
        self.publish(&before, header)?;
        Ok(outcome.previous)
    }

    fn insert_into(
        &self,
        header: &mut TreeHeader,
        node_id: NodeId,
        key: K,
        value: V,
    ) -> ArborResult<Inserted<K, V>> {
        let mut node = self.load(node_id)?;
        let previous = match &mut node {
            Node::Leaf { keys, values, .. } => {
                let pos = index_of(keys, &key);
                if pos < keys.len() && keys[pos] == key {
                    Some(std::mem::replace(&mut values[pos], value))
                } else {
                    keys.insert(pos, key);
                    values.insert(pos, value);
                    None
                }
            }
            Node::Inner { keys, children } => {
                // Keys above the current maximum extend the last child.
                let slot = index_of(keys, &key).min(keys.len().saturating_sub(1));
                let child = self.insert_into(header, children[slot], key, value)?;
                keys[slot] = child.max;
                if let Some((right, right_max)) = child.split {
                    keys.insert(slot + 1, right_max);
                    children.insert(slot + 1, right);
                }
                child.previous
            }
        };

        let split = if node.len() > header.page_size {
            Some(self.split(header, node_id, &mut node)?)
        } else {
            None
        };
        self.save(node_id, &node)?;
        Ok(Inserted {
            previous,
            max: max_of(&node)?,
            split,
        })
    }

    /// Moves the upper half of an overfull node into a new right sibling.
    fn split(
        &self,
        header: &mut TreeHeader,
        node_id: NodeId,
        node: &mut Node<K, V>,
    ) -> ArborResult<(NodeId, K)> {
        let at = node.len() / 2;
        let right_id = header.allocate();
        let mut right = node.split_off(at);

        if let (Node::Leaf { next, .. }, Node::Leaf { prev: rp, next: rn, .. }) =
            (&mut *node, &mut right)
        {
            *rp = Some(node_id);
            *rn = next.replace(right_id);
            if let Some(after) = *rn {
                self.relink_prev(after, right_id)?;
            }
        }

        self.save(right_id, &right)?;
        Counters::bump(&self.counters.splits);
        tracing::trace!(tree = %self.id, node = %node_id, sibling = %right_id, "split node");
        Ok((right_id, max_of(&right)?))
    }

    fn relink_prev(&self, leaf_id: NodeId, prev_id: NodeId) -> ArborResult<()> {
        let mut leaf = self.load(leaf_id)?;
        match &mut leaf {
            Node::Leaf { prev, .. } => *prev = Some(prev_id),
            Node::Inner { .. } => {
                return Err(ArborError::corruption(format!(
                    "leaf link of tree {} points at inner node {leaf_id}",
                    self.id
                )))
            }
        }
        self.save(leaf_id, &leaf)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    fn remove(&self, key: &K) -> ArborResult<Option<V>> {
        self.check_live()?;
        let before = self.header();
        let mut header = before;
        let mut root = self.load(header.root)?;
        let root_id = header.root;
        let Some(previous) = self.remove_from(&header, root_id, &mut root, key)? else {
            return Ok(None);
        };
        header.len = header.len.saturating_sub(1);

        loop {
            let only = match &root {
                Node::Inner { children, .. } if children.len() == 1 => children[0],
                _ => break,
            };
            self.discard(header.root)?;
            header.root = only;
            header.height = header.height.saturating_sub(1);
            root = self.load(only)?;
            tracing::debug!(tree = %self.id, height = header.height, "tree shrank");
        }

        self.publish(&before, header)?;
        Ok(Some(previous))
    }

    fn remove_from(
        &self,
        header: &TreeHeader,
        node_id: NodeId,
        node: &mut Node<K, V>,
        key: &K,
    ) -> ArborResult<Option<V>> {
        let previous = match node {
            Node::Leaf { keys, values, .. } => {
                let pos = index_of(keys, key);
                if pos == keys.len() || keys[pos] != *key {
                    return Ok(None);
                }
                keys.remove(pos);
                values.remove(pos)
            }
            Node::Inner { keys, children } => {
                let slot = index_of(keys, key);
                if slot == keys.len() {
                    return Ok(None);
                }
                let child_id = children[slot];
                let mut child = self.load(child_id)?;
                let Some(previous) = self.remove_from(header, child_id, &mut child, key)? else {
                    return Ok(None);
                };
                if child.len() < header.min_occupancy() {
                    self.rebalance(header.min_occupancy(), keys, children, slot, child)?;
                } else {
                    keys[slot] = max_of(&child)?;
                }
                previous
            }
        };
        self.save(node_id, node)?;
        Ok(Some(previous))
    }

    /// Fixes an underfull child at `slot` by borrowing from or merging with
    /// a sibling. The child has already been persisted.
    fn rebalance(
        &self,
        min: usize,
        keys: &mut Vec<K>,
        children: &mut Vec<NodeId>,
        slot: usize,
        mut child: Node<K, V>,
    ) -> ArborResult<()> {
        let child_id = children[slot];
        if slot > 0 {
            let left_id = children[slot - 1];
            let mut left = self.load(left_id)?;
            if left.len() > min {
                left.shift_last_into(&mut child)?;
                keys[slot - 1] = max_of(&left)?;
                keys[slot] = max_of(&child)?;
                self.save(left_id, &left)?;
                self.save(child_id, &child)?;
                Counters::bump(&self.counters.borrows);
                return Ok(());
            }
            return self.merge(keys, children, slot - 1, left, child);
        }

        let Some(&right_id) = children.get(slot + 1) else {
            // Sole child of the root; the caller collapses the root.
            if let Some(max) = child.max_key() {
                keys[slot] = max.clone();
            }
            return Ok(());
        };
        let mut right = self.load(right_id)?;
        if right.len() > min {
            right.shift_first_into(&mut child)?;
            keys[slot] = max_of(&child)?;
            self.save(right_id, &right)?;
            self.save(child_id, &child)?;
            Counters::bump(&self.counters.borrows);
            return Ok(());
        }
        self.merge(keys, children, slot, child, right)
    }

    /// Merges the node at `slot + 1` into the node at `slot`.
    fn merge(
        &self,
        keys: &mut Vec<K>,
        children: &mut Vec<NodeId>,
        slot: usize,
        mut left: Node<K, V>,
        right: Node<K, V>,
    ) -> ArborResult<()> {
        let left_id = children[slot];
        let right_id = children[slot + 1];
        let after = match &right {
            Node::Leaf { next, .. } => *next,
            Node::Inner { .. } => None,
        };
        left.absorb(right)?;
        if let Some(after) = after {
            self.relink_prev(after, left_id)?;
        }
        self.save(left_id, &left)?;
        self.discard(right_id)?;

        keys.remove(slot + 1);
        children.remove(slot + 1);
        keys[slot] = max_of(&left)?;
        Counters::bump(&self.counters.merges);
        tracing::trace!(tree = %self.id, node = %left_id, absorbed = %right_id, "merged nodes");
        Ok(())
    }

    // =========================================================================
    // Whole-tree operations
    // =========================================================================

    fn validate(&self) -> ArborResult<TreeShape> {
        self.check_live()?;
        let header = self.header();
        let mut shape = TreeShape {
            height: header.height,
            leaves: 0,
            inner_nodes: 0,
            entries: 0,
        };
        let mut chain = Vec::new();
        self.check_subtree(&header, header.root, 0, None, &mut shape, &mut chain)?;

        for (i, (leaf, prev, next)) in chain.iter().enumerate() {
            let expected_prev = i.checked_sub(1).map(|p| chain[p].0);
            let expected_next = chain.get(i + 1).map(|n| n.0);
            if *prev != expected_prev || *next != expected_next {
                return Err(ArborError::corruption(format!(
                    "leaf {leaf} links {prev:?}/{next:?}, expected {expected_prev:?}/{expected_next:?}"
                )));
            }
        }
        if shape.entries != header.len {
            return Err(ArborError::corruption(format!(
                "tree {} holds {} entries but its header records {}",
                self.id, shape.entries, header.len
            )));
        }
        Ok(shape)
    }

    /// Checks one subtree and returns its largest key.
    fn check_subtree(
        &self,
        header: &TreeHeader,
        node_id: NodeId,
        depth: u32,
        lower: Option<&K>,
        shape: &mut TreeShape,
        chain: &mut Vec<(NodeId, Option<NodeId>, Option<NodeId>)>,
    ) -> ArborResult<Option<K>> {
        let node = self.load(node_id)?;
        let keys = node.keys();
        let is_root = node_id == header.root;
        let fail = |what: String| Err(ArborError::corruption(format!("node {node_id}: {what}")));

        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return fail("keys out of order".into());
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if first <= lower {
                return fail(format!("key {first:?} not above {lower:?}"));
            }
        }
        if node.len() > header.page_size {
            return fail(format!("{} entries exceed page size {}", node.len(), header.page_size));
        }
        if !is_root && node.len() < header.min_occupancy() {
            return fail(format!("underfull with {} entries", node.len()));
        }

        match &node {
            Node::Leaf { prev, next, .. } => {
                if depth != header.height {
                    return fail(format!("leaf at depth {depth}, tree height {}", header.height));
                }
                shape.leaves += 1;
                shape.entries += keys.len() as u64;
                chain.push((node_id, *prev, *next));
            }
            Node::Inner { keys, children } => {
                if is_root && children.len() < 2 {
                    return fail("root with a single child".into());
                }
                shape.inner_nodes += 1;
                let mut low = lower.cloned();
                for (key, child) in keys.iter().zip(children) {
                    let child_max =
                        self.check_subtree(header, *child, depth + 1, low.as_ref(), shape, chain)?;
                    if child_max.as_ref() != Some(key) {
                        return fail(format!("separator {key:?} but child max {child_max:?}"));
                    }
                    low = Some(key.clone());
                }
            }
        }
        Ok(node.max_key().cloned())
    }

    fn delete(&self) -> ArborResult<()> {
        self.check_live()?;
        let mut pending = vec![self.header().root];
        let mut removed = 0usize;
        while let Some(node_id) = pending.pop() {
            if let Node::Inner { children, .. } = self.load(node_id)? {
                pending.extend(children);
            }
            self.discard(node_id)?;
            removed += 1;
        }
        self.wait(self.store.delete(&self.id))?;
        self.deleted.store(true, AtomicOrdering::Release);
        tracing::debug!(tree = %self.id, nodes = removed, "deleted tree");
        Ok(())
    }
}

/// A persistent B+Tree mapping `K` to `V`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use arbor_btree::{BTree, Direction};
/// use arbor_common::Identifier;
/// use arbor_exec::Executor;
/// use arbor_store::MemoryStore;
/// use arbor_txn::OperationScheduler;
///
/// let executor = Executor::new(2);
/// let store = Arc::new(MemoryStore::new(executor.clone()));
/// let scheduler = OperationScheduler::new(executor.clone());
///
/// let tree: BTree<i64, String> =
///     BTree::create_instance(store, scheduler, Identifier::parse("t"), 4)
///         .wait(&executor)
///         .unwrap();
/// for k in [3, 1, 2] {
///     tree.insert(k, format!("v{k}"));
/// }
/// assert_eq!(tree.get(&2).wait(&executor).unwrap(), Some("v2".to_string()));
///
/// let mut cursor = tree.cursor(Direction::Reverse).wait(&executor).unwrap();
/// cursor.first().unwrap();
/// assert_eq!(cursor.key(), Some(&3));
/// ```
pub struct BTree<K, V> {
    core: Arc<TreeCore<K, V>>,
    scheduler: OperationScheduler,
}

impl<K, V> Clone for BTree<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<K: TreeKey, V: TreeValue> BTree<K, V> {
    fn with_header(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        id: Identifier,
        header: TreeHeader,
    ) -> Self {
        let core = TreeCore {
            store,
            executor: scheduler.executor().clone(),
            id,
            header: Mutex::new(header),
            deleted: AtomicBool::new(false),
            torn: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            counters: Counters::default(),
            _types: PhantomData,
        };
        Self {
            core: Arc::new(core),
            scheduler,
        }
    }

    /// Creates an empty tree at `id`. Fails if a tree already exists there.
    pub fn create_instance(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        id: Identifier,
        page_size: usize,
    ) -> Promise<Self> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Promise::failed(ArborError::invalid_config(format!(
                "page size {page_size} outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"
            )));
        }
        let tree = Self::with_header(store, scheduler, id, TreeHeader::new(page_size));
        let path = tree.core.id.clone();
        let scheduler = tree.scheduler.clone();
        scheduler.schedule_update(&path, move || {
            Promise::settled(tree.core.initialize().map(|()| tree))
        })
    }

    /// Opens the tree stored at `id`.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        scheduler: OperationScheduler,
        id: Identifier,
    ) -> Promise<Self> {
        let path = id.clone();
        let reader = scheduler.clone();
        reader.schedule(&path, OperationKind::Read, move || {
            let executor = scheduler.executor().clone();
            let opened = store.fetch(&id).wait(&executor).and_then(|bytes| {
                let bytes = bytes.ok_or_else(|| ArborError::NotFound { path: id.clone() })?;
                let header: TreeHeader = codec::from_bytes(&bytes)?;
                Ok(Self::with_header(store, scheduler, id, header))
            });
            Promise::settled(opened)
        })
    }

    /// Returns the tree's identifier.
    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.core.id
    }

    /// Returns the maximum entries per node.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.core.header().page_size
    }

    /// Returns the number of levels above the leaves, as of the last
    /// completed mutation.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.core.header().height
    }

    /// Returns tree statistics.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        self.core.counters.snapshot()
    }

    fn read<T, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TreeCore<K, V>) -> ArborResult<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.scheduler
            .schedule(&self.core.id, OperationKind::Read, move || {
                Promise::settled(f(&core))
            })
    }

    fn update<T, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TreeCore<K, V>) -> ArborResult<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.scheduler
            .schedule_update(&self.core.id, move || Promise::settled(core.mutate(f)))
    }

    /// Inserts `value` under `key`, yielding the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Promise<Option<V>> {
        self.update(move |core| core.insert(key, value))
    }

    /// Removes `key`, yielding its value.
    pub fn remove(&self, key: K) -> Promise<Option<V>> {
        self.update(move |core| core.remove(&key))
    }

    /// Looks up `key`.
    pub fn get(&self, key: &K) -> Promise<Option<V>> {
        let key = key.clone();
        self.read(move |core| core.get(&key))
    }

    /// Yields the number of entries.
    pub fn len(&self) -> Promise<u64> {
        self.read(|core| {
            core.check_live()?;
            Ok(core.header().len)
        })
    }

    /// Yields true if the tree holds no entries.
    pub fn is_empty(&self) -> Promise<bool> {
        self.len().map(|len| len == 0)
    }

    /// Opens a cursor walking in `direction`.
    ///
    /// The cursor reads the tree as it stands once every operation issued
    /// before this call completed. It is not isolated from later mutations.
    pub fn cursor(&self, direction: Direction) -> Promise<Cursor<K, V>> {
        let core = Arc::clone(&self.core);
        self.read(move |inner| {
            inner.check_live()?;
            Ok(Cursor::new(core, inner.header().root, direction))
        })
    }

    /// Checks every structural invariant and summarizes the tree's shape.
    pub fn validate(&self) -> Promise<TreeShape> {
        self.read(|core| core.validate())
    }

    /// Removes every node and the header. Later calls fail.
    pub fn delete(&self) -> Promise<()> {
        self.update(|core| core.delete())
    }
}

impl<K, V> std::fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("id", &self.core.id)
            .field("header", &*self.core.header.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{MemoryStore, RawStore};
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    struct Fixture {
        executor: Executor,
        memory: MemoryStore,
        scheduler: OperationScheduler,
    }

    fn fixture() -> Fixture {
        let executor = Executor::new(4);
        Fixture {
            memory: MemoryStore::new(executor.clone()),
            scheduler: OperationScheduler::new(executor.clone()),
            executor,
        }
    }

    fn create(f: &Fixture, page_size: usize) -> BTree<i64, i64> {
        BTree::create_instance(
            Arc::new(f.memory.clone()),
            f.scheduler.clone(),
            Identifier::parse("trees/t"),
            page_size,
        )
        .wait(&f.executor)
        .unwrap()
    }

    fn keys(f: &Fixture, tree: &BTree<i64, i64>, direction: Direction) -> Vec<i64> {
        let mut cursor = tree.cursor(direction).wait(&f.executor).unwrap();
        let mut out = Vec::new();
        let mut valid = cursor.first().unwrap();
        while valid {
            out.push(*cursor.key().unwrap());
            valid = cursor.next().unwrap();
        }
        out
    }

    #[test]
    fn test_insert_get_replace() {
        let f = fixture();
        let tree = create(&f, 4);
        assert!(tree.is_empty().wait(&f.executor).unwrap());
        assert_eq!(tree.insert(5, 50).wait(&f.executor).unwrap(), None);
        assert_eq!(tree.insert(5, 55).wait(&f.executor).unwrap(), Some(50));
        assert_eq!(tree.get(&5).wait(&f.executor).unwrap(), Some(55));
        assert_eq!(tree.get(&6).wait(&f.executor).unwrap(), None);
        assert_eq!(tree.len().wait(&f.executor).unwrap(), 1);
    }

    #[test]
    fn test_splits_grow_the_tree() {
        let f = fixture();
        let tree = create(&f, 4);
        for k in 0..100 {
            tree.insert(k, k * 10);
        }
        let shape = tree.validate().wait(&f.executor).unwrap();
        assert_eq!(shape.entries, 100);
        assert!(shape.height >= 2);
        assert!(tree.stats().splits > 0);
        assert_eq!(keys(&f, &tree, Direction::Forward), (0..100).collect::<Vec<_>>());
        assert_eq!(
            keys(&f, &tree, Direction::Reverse),
            (0..100).rev().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_removal_merges_and_collapses() {
        let f = fixture();
        let tree = create(&f, 4);
        for k in 0..64 {
            tree.insert(k, k);
        }
        let grown = tree.validate().wait(&f.executor).unwrap().height;
        for k in (0..64).filter(|k| k % 3 != 0) {
            assert_eq!(tree.remove(k).wait(&f.executor).unwrap(), Some(k));
            tree.validate().wait(&f.executor).unwrap();
        }
        assert_eq!(tree.remove(1).wait(&f.executor).unwrap(), None);
        for k in (0..64).filter(|k| k % 3 == 0) {
            tree.remove(k).wait(&f.executor).unwrap();
        }
        let shape = tree.validate().wait(&f.executor).unwrap();
        assert_eq!(shape.entries, 0);
        assert_eq!(shape.height, 0);
        assert!(grown > 0);
        assert!(tree.stats().merges > 0);
        assert!(tree.is_empty().wait(&f.executor).unwrap());
    }

    #[test]
    fn test_random_operations_match_reference() {
        let f = fixture();
        let tree = create(&f, 6);
        let mut reference = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1500 {
            let key = rng.gen_range(0..300);
            if rng.gen_bool(0.6) {
                let value = rng.gen::<i64>();
                let previous = tree.insert(key, value).wait(&f.executor).unwrap();
                assert_eq!(previous, reference.insert(key, value));
            } else {
                let previous = tree.remove(key).wait(&f.executor).unwrap();
                assert_eq!(previous, reference.remove(&key));
            }
        }
        let shape = tree.validate().wait(&f.executor).unwrap();
        assert_eq!(shape.entries, reference.len() as u64);
        let expected: Vec<i64> = reference.keys().copied().collect();
        assert_eq!(keys(&f, &tree, Direction::Forward), expected);
        for (k, v) in &reference {
            assert_eq!(tree.get(k).wait(&f.executor).unwrap(), Some(*v));
        }
    }

    #[test]
    fn test_reopen_reads_persisted_nodes() {
        let f = fixture();
        let tree = create(&f, 4);
        for k in 0..30 {
            tree.insert(k, -k);
        }
        tree.len().wait(&f.executor).unwrap();

        let reopened: BTree<i64, i64> = BTree::open(
            Arc::new(f.memory.clone()),
            f.scheduler.clone(),
            Identifier::parse("trees/t"),
        )
        .wait(&f.executor)
        .unwrap();
        assert_eq!(reopened.len().wait(&f.executor).unwrap(), 30);
        assert_eq!(reopened.get(&17).wait(&f.executor).unwrap(), Some(-17));
        assert_eq!(reopened.height(), tree.height());
    }

    #[test]
    fn test_create_twice_and_open_missing() {
        let f = fixture();
        let _tree = create(&f, 4);
        let again = BTree::<i64, i64>::create_instance(
            Arc::new(f.memory.clone()),
            f.scheduler.clone(),
            Identifier::parse("trees/t"),
            4,
        );
        assert!(matches!(
            again.wait(&f.executor).unwrap_err(),
            ArborError::InvalidState { .. }
        ));

        let missing = BTree::<i64, i64>::open(
            Arc::new(f.memory.clone()),
            f.scheduler.clone(),
            Identifier::parse("trees/none"),
        );
        assert!(matches!(
            missing.wait(&f.executor).unwrap_err(),
            ArborError::NotFound { .. }
        ));

        let bad = BTree::<i64, i64>::create_instance(
            Arc::new(f.memory.clone()),
            f.scheduler.clone(),
            Identifier::parse("trees/u"),
            2,
        );
        assert!(bad.wait(&f.executor).is_err());
    }

    #[test]
    fn test_delete_drops_every_node() {
        let f = fixture();
        let tree = create(&f, 4);
        for k in 0..40 {
            tree.insert(k, k);
        }
        tree.delete().wait(&f.executor).unwrap();
        assert!(f.memory.paths_within(&Identifier::parse("trees/t")).is_empty());
        assert!(tree.get(&1).wait(&f.executor).is_err());
    }

    #[test]
    fn test_corrupt_node_image() {
        let f = fixture();
        let tree = create(&f, 4);
        tree.insert(1, 1).wait(&f.executor).unwrap();
        let root = NodeId::new(0).path(tree.id());
        f.memory
            .store(&root, Bytes::from_static(&[0xEE, 0x01]))
            .wait(&f.executor)
            .unwrap();
        let err = tree.get(&1).wait(&f.executor).unwrap_err();
        assert!(matches!(err, ArborError::Corruption { .. }));
    }

    #[test]
    fn test_tree_in_storage_session() {
        use arbor_common::config::ArborConfig;
        use arbor_mvcc::{Repository, SessionMode};

        let f = fixture();
        let repo = Repository::open(
            Arc::new(f.memory.clone()),
            f.executor.clone(),
            &ArborConfig::default(),
        )
        .unwrap();
        let id = Identifier::parse("trees/s");

        let writer = Arc::new(repo.begin_session(SessionMode::ReadWrite).unwrap());
        let tree: BTree<i64, i64> =
            BTree::create_instance(writer.clone(), f.scheduler.clone(), id.clone(), 4)
                .wait(&f.executor)
                .unwrap();
        for k in 0..20 {
            tree.insert(k, k * k);
        }
        tree.validate().wait(&f.executor).unwrap();

        let before = Arc::new(repo.begin_session(SessionMode::ReadOnly).unwrap());
        writer.commit().wait(&f.executor).unwrap();

        let hidden = BTree::<i64, i64>::open(before, f.scheduler.clone(), id.clone());
        assert!(matches!(
            hidden.wait(&f.executor).unwrap_err(),
            ArborError::NotFound { .. }
        ));

        let reader = Arc::new(repo.begin_session(SessionMode::ReadOnly).unwrap());
        let seen: BTree<i64, i64> = BTree::open(reader, f.scheduler.clone(), id)
            .wait(&f.executor)
            .unwrap();
        assert_eq!(seen.get(&7).wait(&f.executor).unwrap(), Some(49));
        assert_eq!(seen.validate().wait(&f.executor).unwrap().entries, 20);
    }

    #[test]
    fn test_store_failure_aborts_operation() {
        let f = fixture();
        let tree = create(&f, 4);
        f.memory.close().wait(&f.executor).unwrap();
        let err = tree.insert(1, 1).wait(&f.executor).unwrap_err();
        assert!(matches!(err, ArborError::Closed { .. }));
    }
}
