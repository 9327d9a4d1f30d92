//! # arbor-btree
//!
//! A persistent B+Tree whose nodes are objects in an ArborDB store.
//!
//! - Each node is one object under the tree's identifier; the header sits at
//!   the identifier itself
//! - Inner nodes key each child by the largest key below it
//! - Leaves are chained both ways, so [`Cursor`]s walk in either direction
//!   without going back through the inner levels
//! - Non-root nodes stay between half full and full; inserts split, removals
//!   borrow from or merge with a sibling
//!
//! Storing a tree in a storage session makes every node image revisioned, so
//! a tree is read and updated with the isolation of the session it lives in.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cursor;
/// Node model and node images.
pub mod node;
mod tree;

pub use cursor::{Cursor, Direction};
pub use node::{NodeId, TreeHeader, TreeKey, TreeValue};
pub use tree::{BTree, TreeShape, TreeStats};
