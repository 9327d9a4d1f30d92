//! Ordered traversal over the leaf chain.

use std::sync::Arc;

use arbor_common::error::{ArborError, ArborResult};

use crate::node::{index_of, Node, NodeId, TreeKey, TreeValue};
use crate::tree::TreeCore;

/// Traversal order of a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys.
    Forward,
    /// Descending keys.
    Reverse,
}

#[derive(Clone)]
struct Leaf<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// A position in a tree.
///
/// A fresh cursor is not positioned; call [`Cursor::first`] or
/// [`Cursor::to`]. Node loads happen on the calling thread.
#[derive(Clone)]
pub struct Cursor<K, V> {
    core: Arc<TreeCore<K, V>>,
    root: NodeId,
    direction: Direction,
    leaf: Option<Leaf<K, V>>,
    pos: usize,
}

impl<K: TreeKey, V: TreeValue> Cursor<K, V> {
    pub(crate) fn new(core: Arc<TreeCore<K, V>>, root: NodeId, direction: Direction) -> Self {
        Self {
            core,
            root,
            direction,
            leaf: None,
            pos: 0,
        }
    }

    /// Returns the traversal order.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns true while the cursor rests on an entry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.leaf.as_ref().is_some_and(|l| self.pos < l.keys.len())
    }

    /// Returns the current key.
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        self.leaf.as_ref().and_then(|l| l.keys.get(self.pos))
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.leaf.as_ref().and_then(|l| l.values.get(self.pos))
    }

    /// Moves to the first entry in traversal order.
    pub fn first(&mut self) -> ArborResult<bool> {
        let mut node_id = self.root;
        loop {
            match self.core.load(node_id)? {
                Node::Inner { children, .. } => {
                    let child = match self.direction {
                        Direction::Forward => children.first(),
                        Direction::Reverse => children.last(),
                    };
                    node_id = *child.ok_or_else(|| empty_inner(node_id))?;
                }
                node => return self.enter(node_id, node, None),
            }
        }
    }

    /// Moves to `key`, or to the entry that follows it in traversal order:
    /// the smallest key `>= key` going forward, the largest `<= key` in
    /// reverse.
    pub fn to(&mut self, key: &K) -> ArborResult<bool> {
        let mut node_id = self.root;
        loop {
            match self.core.load(node_id)? {
                Node::Inner { keys, children } => {
                    let mut slot = index_of(&keys, key);
                    if slot == keys.len() {
                        match self.direction {
                            Direction::Forward => return Ok(self.invalidate()),
                            Direction::Reverse => slot = keys.len().saturating_sub(1),
                        }
                    }
                    node_id = *children.get(slot).ok_or_else(|| empty_inner(node_id))?;
                }
                node => {
                    let pos = index_of(node.keys(), key);
                    let exact = node.keys().get(pos) == Some(key);
                    return match self.direction {
                        Direction::Forward => self.enter(node_id, node, Some(pos)),
                        Direction::Reverse if exact => self.enter(node_id, node, Some(pos)),
                        Direction::Reverse if pos > 0 => self.enter(node_id, node, Some(pos - 1)),
                        Direction::Reverse => {
                            let prev = match &node {
                                Node::Leaf { prev, .. } => *prev,
                                Node::Inner { .. } => None,
                            };
                            self.follow(prev)
                        }
                    };
                }
            }
        }
    }

    /// Advances one entry. Returns false once the traversal is exhausted.
    pub fn next(&mut self) -> ArborResult<bool> {
        let Some(leaf) = &self.leaf else {
            return Ok(false);
        };
        match self.direction {
            Direction::Forward => {
                self.pos += 1;
                if self.pos < leaf.keys.len() {
                    return Ok(true);
                }
                let next = leaf.next;
                self.follow(next)
            }
            Direction::Reverse => {
                if self.pos > 0 && self.pos <= leaf.keys.len() {
                    self.pos -= 1;
                    return Ok(true);
                }
                let prev = leaf.prev;
                self.follow(prev)
            }
        }
    }

    fn invalidate(&mut self) -> bool {
        self.leaf = None;
        self.pos = 0;
        false
    }

    /// Rests on `node` at `pos`, or at its traversal start when `pos` is
    /// `None`. Steps over to the neighbour leaf if `pos` is past the end.
    fn enter(&mut self, node_id: NodeId, node: Node<K, V>, pos: Option<usize>) -> ArborResult<bool> {
        let Node::Leaf {
            keys,
            values,
            prev,
            next,
        } = node
        else {
            return Err(ArborError::corruption(format!(
                "expected a leaf at node {node_id}"
            )));
        };
        let len = keys.len();
        let pos = pos.unwrap_or(match self.direction {
            Direction::Forward => 0,
            Direction::Reverse => len.saturating_sub(1),
        });
        self.leaf = Some(Leaf {
            keys,
            values,
            prev,
            next,
        });
        self.pos = pos;
        if pos < len {
            return Ok(true);
        }
        let link = match self.direction {
            Direction::Forward => next,
            Direction::Reverse => prev,
        };
        self.follow(link)
    }

    fn follow(&mut self, mut link: Option<NodeId>) -> ArborResult<bool> {
        while let Some(node_id) = link {
            let node = self.core.load(node_id)?;
            if !node.is_empty() {
                return self.enter(node_id, node, None);
            }
            link = match node {
                Node::Leaf { prev, next, .. } => match self.direction {
                    Direction::Forward => next,
                    Direction::Reverse => prev,
                },
                Node::Inner { .. } => {
                    return Err(ArborError::corruption(format!(
                        "leaf link points at inner node {node_id}"
                    )))
                }
            };
        }
        Ok(self.invalidate())
    }
}

fn empty_inner(node_id: NodeId) -> ArborError {
    ArborError::corruption(format!("inner node {node_id} has no children"))
}

impl<K, V> std::fmt::Debug for Cursor<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("direction", &self.direction)
            .field("positioned", &self.leaf.is_some())
            .field("pos", &self.pos)
            .finish()
    }
}
