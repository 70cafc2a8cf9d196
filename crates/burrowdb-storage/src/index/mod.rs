//! Copy-on-write ordered index.

pub mod node;
pub mod tree;

pub use node::{Internal, Leaf, Node, BRANCHING};
pub use tree::{compare_to_prefix, BTree, Iter};
