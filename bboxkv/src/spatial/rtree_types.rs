//! Core types of the R-tree spatial index:
//! - Error and result types
//! - Arena node types
//! - Statistics

use std::io;

use thiserror::Error;

use super::spatial_index_entry::SpatialIndexEntry;
use crate::entity::BoundingBox;
use crate::errors::{ErrorKind, StorageError};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial index operations
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<SpatialError> for StorageError {
    fn from(err: SpatialError) -> Self {
        match err {
            SpatialError::Io(io_err) => StorageError::from(io_err),
            SpatialError::Serialization(msg) => StorageError::new(&msg, ErrorKind::EncodingError),
            SpatialError::Integrity(msg) => StorageError::new(&msg, ErrorKind::IntegrityError),
            SpatialError::InvalidOperation(msg) => {
                StorageError::new(&msg, ErrorKind::Extension("Spatial".to_string()))
            }
        }
    }
}

impl From<StorageError> for SpatialError {
    fn from(err: StorageError) -> Self {
        match err.kind() {
            ErrorKind::IOError | ErrorKind::FileNotFound => {
                SpatialError::Io(io::Error::other(err.message().to_string()))
            }
            ErrorKind::EncodingError | ErrorKind::ParseError => {
                SpatialError::Serialization(err.message().to_string())
            }
            ErrorKind::IntegrityError => SpatialError::Integrity(err.message().to_string()),
            _ => SpatialError::InvalidOperation(err.message().to_string()),
        }
    }
}

/// Result type for spatial index operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Index of a node in the tree's arena
pub type NodeId = u32;

// ============================================================================
// Statistics
// ============================================================================

/// Shape statistics of an R-tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RTreeStats {
    pub entries: u64,
    pub nodes: u64,
    pub leaf_nodes: u64,
    pub height: u32,
}

// ============================================================================
// Node Types
// ============================================================================

/// Content of a node. The kind never changes after creation.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    /// Leaf node holding index entries
    Leaf(Vec<SpatialIndexEntry>),
    /// Directory node holding child node ids
    Directory(Vec<NodeId>),
}

/// A node of the arena.
///
/// `parent` is a plain id used to walk upwards during insert and split; the
/// tree owns every node through its arena.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) bounding_box: BoundingBox,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn leaf(parent: Option<NodeId>, entries: Vec<SpatialIndexEntry>) -> Self {
        Self {
            parent,
            bounding_box: BoundingBox::empty(),
            kind: NodeKind::Leaf(entries),
        }
    }

    pub(crate) fn directory(parent: Option<NodeId>, children: Vec<NodeId>) -> Self {
        Self {
            parent,
            bounding_box: BoundingBox::empty(),
            kind: NodeKind::Directory(children),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// Number of entries (leaf) or children (directory)
    pub(crate) fn len(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf(entries) => entries.len(),
            NodeKind::Directory(children) => children.len(),
        }
    }

    pub(crate) fn entries(&self) -> &[SpatialIndexEntry] {
        match &self.kind {
            NodeKind::Leaf(entries) => entries,
            NodeKind::Directory(_) => &[],
        }
    }

    pub(crate) fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf(_) => &[],
            NodeKind::Directory(children) => children,
        }
    }
}
