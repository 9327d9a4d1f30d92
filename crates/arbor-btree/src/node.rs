//! Node types of the persistent B+Tree.
//!
//! - Inner nodes hold keys and child node ids. `keys[i]` is the largest key
//!   stored under `children[i]`.
//! - Leaf nodes hold keys with their values plus links to the neighbouring
//!   leaves.
//!
//! Each node is persisted as one object at `<tree>/<node id>`; the tree
//! header lives at `<tree>` itself.
//!
//! # Image Layout
//!
//! ```text
//! leaf:    [NODE_LEAF ][prev: Option<u64>][next: Option<u64>][keys: List][values: List]
//! inner:   [NODE_INNER][keys: List][children: List<u64>]
//! header:  [NODE_HEADER][root][next_node][page_size][len][height]
//! ```

use std::fmt;

use arbor_common::codec::{self, Decode, Encode};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::Identifier;
use bytes::{Buf, BufMut, BytesMut};

/// Kind byte of a leaf image.
pub const NODE_LEAF: u8 = 0x4C;
/// Kind byte of an inner image.
pub const NODE_INNER: u8 = 0x49;
/// Kind byte of a tree header image.
pub const NODE_HEADER: u8 = 0x48;

/// Keys a tree can hold.
pub trait TreeKey: Encode + Decode + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> TreeKey for T where T: Encode + Decode + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// Values a tree can hold.
pub trait TreeValue: Encode + Decode + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> TreeValue for T where T: Encode + Decode + Clone + fmt::Debug + Send + Sync + 'static {}

/// Identifier of a node within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the path of this node under `tree`.
    #[must_use]
    pub fn path(self, tree: &Identifier) -> Identifier {
        tree.child(self.0.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Encode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl Decode for NodeId {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        u64::decode(buf).map(NodeId)
    }
}

/// Returns the first slot whose key is `>= key`, or `keys.len()`.
#[inline]
pub fn index_of<K: Ord>(keys: &[K], key: &K) -> usize {
    keys.partition_point(|k| k < key)
}

/// A B+Tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<K, V> {
    /// Routing node.
    Inner {
        /// Largest key under each child.
        keys: Vec<K>,
        /// Child node ids, one per key.
        children: Vec<NodeId>,
    },
    /// Data node.
    Leaf {
        /// Keys in ascending order.
        keys: Vec<K>,
        /// Values, one per key.
        values: Vec<V>,
        /// Previous leaf in key order.
        prev: Option<NodeId>,
        /// Next leaf in key order.
        next: Option<NodeId>,
    },
}

impl<K: TreeKey, V: TreeValue> Node<K, V> {
    /// Creates an empty leaf.
    #[must_use]
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            prev: None,
            next: None,
        }
    }

    /// Returns the keys of the node.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        match self {
            Node::Inner { keys, .. } | Node::Leaf { keys, .. } => keys,
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if the node holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Returns true for leaves.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Returns the largest key in the node's subtree.
    #[must_use]
    pub fn max_key(&self) -> Option<&K> {
        self.keys().last()
    }

    /// Splits off the upper half into a new node. For leaves the caller
    /// fixes up the sibling links.
    pub fn split_off(&mut self, at: usize) -> Self {
        match self {
            Node::Inner { keys, children } => Node::Inner {
                keys: keys.split_off(at),
                children: children.split_off(at),
            },
            Node::Leaf { keys, values, .. } => Node::Leaf {
                keys: keys.split_off(at),
                values: values.split_off(at),
                prev: None,
                next: None,
            },
        }
    }

    /// Moves the last entry of `self` to the front of `other`.
    pub fn shift_last_into(&mut self, other: &mut Self) -> ArborResult<()> {
        match (self, other) {
            (Node::Inner { keys, children }, Node::Inner { keys: ok, children: oc }) => {
                let (Some(k), Some(c)) = (keys.pop(), children.pop()) else {
                    return Err(ArborError::internal("borrow from an empty inner node"));
                };
                ok.insert(0, k);
                oc.insert(0, c);
            }
            (Node::Leaf { keys, values, .. }, Node::Leaf { keys: ok, values: ov, .. }) => {
                let (Some(k), Some(v)) = (keys.pop(), values.pop()) else {
                    return Err(ArborError::internal("borrow from an empty leaf"));
                };
                ok.insert(0, k);
                ov.insert(0, v);
            }
            _ => return Err(ArborError::corruption("siblings at different levels")),
        }
        Ok(())
    }

    /// Moves the first entry of `self` to the back of `other`.
    pub fn shift_first_into(&mut self, other: &mut Self) -> ArborResult<()> {
        if self.is_empty() {
            return Err(ArborError::internal("borrow from an empty node"));
        }
        match (self, other) {
            (Node::Inner { keys, children }, Node::Inner { keys: ok, children: oc }) => {
                ok.push(keys.remove(0));
                oc.push(children.remove(0));
            }
            (Node::Leaf { keys, values, .. }, Node::Leaf { keys: ok, values: ov, .. }) => {
                ok.push(keys.remove(0));
                ov.push(values.remove(0));
            }
            _ => return Err(ArborError::corruption("siblings at different levels")),
        }
        Ok(())
    }

    /// Appends every entry of `right` to `self`. A leaf takes over the
    /// `next` link of `right`.
    pub fn absorb(&mut self, right: Self) -> ArborResult<()> {
        match (self, right) {
            (Node::Inner { keys, children }, Node::Inner { keys: rk, children: rc }) => {
                keys.extend(rk);
                children.extend(rc);
            }
            (
                Node::Leaf {
                    keys, values, next, ..
                },
                Node::Leaf {
                    keys: rk,
                    values: rv,
                    next: rn,
                    ..
                },
            ) => {
                keys.extend(rk);
                values.extend(rv);
                *next = rn;
            }
            _ => return Err(ArborError::corruption("siblings at different levels")),
        }
        Ok(())
    }
}

impl<K: TreeKey, V: TreeValue> Encode for Node<K, V> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Node::Inner { keys, children } => {
                buf.put_u8(NODE_INNER);
                keys.encode(buf);
                children.encode(buf);
            }
            Node::Leaf {
                keys,
                values,
                prev,
                next,
            } => {
                buf.put_u8(NODE_LEAF);
                prev.encode(buf);
                next.encode(buf);
                keys.encode(buf);
                values.encode(buf);
            }
        }
    }
}

impl<K: TreeKey, V: TreeValue> Decode for Node<K, V> {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        codec::ensure_remaining(buf, 1, "node kind")?;
        match buf.get_u8() {
            NODE_INNER => {
                let keys: Vec<K> = Vec::decode(buf)?;
                let children: Vec<NodeId> = Vec::decode(buf)?;
                if keys.len() != children.len() || keys.is_empty() {
                    return Err(ArborError::corruption(format!(
                        "inner node with {} keys and {} children",
                        keys.len(),
                        children.len()
                    )));
                }
                Ok(Node::Inner { keys, children })
            }
            NODE_LEAF => {
                let prev = Option::decode(buf)?;
                let next = Option::decode(buf)?;
                let keys: Vec<K> = Vec::decode(buf)?;
                let values: Vec<V> = Vec::decode(buf)?;
                if keys.len() != values.len() {
                    return Err(ArborError::corruption(format!(
                        "leaf with {} keys and {} values",
                        keys.len(),
                        values.len()
                    )));
                }
                Ok(Node::Leaf {
                    keys,
                    values,
                    prev,
                    next,
                })
            }
            other => Err(ArborError::corruption(format!("unknown node kind {other:#04x}"))),
        }
    }
}

/// Persisted tree metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    /// Root node.
    pub root: NodeId,
    /// Next node id to hand out.
    pub next_node: u64,
    /// Maximum entries per node.
    pub page_size: usize,
    /// Number of entries in the tree.
    pub len: u64,
    /// Levels above the leaves.
    pub height: u32,
}

impl TreeHeader {
    /// Header of a tree holding a single empty leaf.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            root: NodeId::new(0),
            next_node: 1,
            page_size,
            len: 0,
            height: 0,
        }
    }

    /// Hands out a fresh node id.
    pub fn allocate(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node);
        self.next_node += 1;
        id
    }

    /// Minimum entries of a non-root node.
    #[must_use]
    pub fn min_occupancy(&self) -> usize {
        self.page_size / 2
    }
}

impl Encode for TreeHeader {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(NODE_HEADER);
        self.root.encode(buf);
        self.next_node.encode(buf);
        (self.page_size as u64).encode(buf);
        self.len.encode(buf);
        u64::from(self.height).encode(buf);
    }
}

impl Decode for TreeHeader {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        codec::expect_tag(buf, NODE_HEADER, "tree header")?;
        let root = NodeId::decode(buf)?;
        let next_node = u64::decode(buf)?;
        let page_size = usize::try_from(u64::decode(buf)?)
            .map_err(|_| ArborError::corruption("page size out of range"))?;
        let len = u64::decode(buf)?;
        let height = u32::try_from(u64::decode(buf)?)
            .map_err(|_| ArborError::corruption("tree height out of range"))?;
        Ok(Self {
            root,
            next_node,
            page_size,
            len,
            height,
        })
    }
}
