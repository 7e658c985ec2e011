//! R-tree spatial index of a table generation.
//!
//! The index maps bounding boxes to the offsets of their records in the data
//! file. It is built in memory while a generation is written, serialized next
//! to the data file and loaded again to answer bounding-box queries.

pub(crate) mod quadratic_split;
pub mod rtree_constants;
pub mod rtree_persistence;
pub mod rtree_types;
pub mod spatial_index_builder;
pub mod spatial_index_entry;
mod rtree_impl;

pub use rtree_constants::DEFAULT_NODE_SIZE;
pub use rtree_impl::RTreeSpatialIndex;
pub use rtree_persistence::IntegrityReport;
pub use rtree_types::{NodeId, RTreeStats, SpatialError, SpatialResult};
pub use spatial_index_builder::SpatialIndexBuilder;
pub use spatial_index_entry::SpatialIndexEntry;
