//! Per-generation metadata, written next to the data file when a table is sealed.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::sstable_constants::MAGIC_BYTES_METADATA;
use crate::entity::{BoundingBox, Tuple};
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// Summary of one sealed table generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SSTableMetadata {
    /// Number of records, tombstones included
    pub tuples: u64,
    /// Number of tombstone records
    pub tombstones: u64,
    /// Smallest timestamp in the table (0 for an empty table)
    pub oldest_timestamp: u64,
    /// Largest timestamp in the table (0 for an empty table)
    pub newest_timestamp: u64,
    /// Covering box of all value tuples
    pub bounding_box: BoundingBox,
    /// Dimension of the covering box
    pub dimension: usize,
}

impl SSTableMetadata {
    /// Accounts for one more record.
    pub fn update(&mut self, tuple: &Tuple) {
        if self.tuples == 0 {
            self.oldest_timestamp = tuple.timestamp();
            self.newest_timestamp = tuple.timestamp();
        } else {
            self.oldest_timestamp = self.oldest_timestamp.min(tuple.timestamp());
            self.newest_timestamp = self.newest_timestamp.max(tuple.timestamp());
        }
        self.tuples += 1;

        if tuple.is_tombstone() {
            self.tombstones += 1;
        } else {
            self.bounding_box = self.bounding_box.covering_box(tuple.bounding_box());
            self.dimension = self.bounding_box.dimension();
        }
    }

    pub fn write_to(&self, path: &Path) -> StorageResult<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC_BYTES_METADATA)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> StorageResult<SSTableMetadata> {
        let bytes = fs::read(path)?;
        let body = bytes.strip_prefix(MAGIC_BYTES_METADATA).ok_or_else(|| {
            StorageError::new(
                &format!("File {:?} does not contain the magic bytes", path),
                ErrorKind::IntegrityError,
            )
        })?;
        let (metadata, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())?;
        Ok(metadata)
    }
}
