//! SpatialIndexBuilder trait definition.

use std::io::Write;

use crate::entity::BoundingBox;

use super::rtree_types::SpatialResult;
use super::spatial_index_entry::SpatialIndexEntry;

/// Builds the spatial index of one table generation.
///
/// Entries are inserted while the generation is written; the finished index
/// is serialized next to the data file.
pub trait SpatialIndexBuilder: Send + Sync {
    /// Inserts one entry. Returns false if the entry was not indexed, e.g.
    /// because its box is empty.
    fn insert(&mut self, entry: SpatialIndexEntry) -> bool;

    /// Inserts all entries, returns true only if every entry was indexed.
    fn bulk_insert(&mut self, entries: Vec<SpatialIndexEntry>) -> bool {
        let mut all_inserted = true;
        for entry in entries {
            all_inserted &= self.insert(entry);
        }
        all_inserted
    }

    /// Finds all entries whose box intersects `query`.
    fn entries_intersecting(&self, query: &BoundingBox) -> Vec<SpatialIndexEntry>;

    /// Serializes the index.
    fn write_to(&self, writer: &mut dyn Write) -> SpatialResult<()>;

    /// Number of indexed entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
