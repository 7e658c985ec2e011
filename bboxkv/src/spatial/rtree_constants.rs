//! Constants for the R-tree spatial index.

/// Default maximum number of entries or children per node.
pub const DEFAULT_NODE_SIZE: usize = 64;

/// Smallest node capacity that still allows a split into two non-empty nodes.
pub const MIN_NODE_SIZE: usize = 2;

/// Marker byte for an empty node or entry slot in the serialized tree.
pub const MAGIC_CHILD_NODE_NOT_EXISTING: u8 = 0;

/// Marker byte for a following node or entry in the serialized tree.
pub const MAGIC_CHILD_NODE_FOLLOWING: u8 = 1;
