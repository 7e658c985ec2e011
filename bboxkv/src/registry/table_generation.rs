use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::entity::{BoundingBox, Tuple};
use crate::errors::StorageResult;
use crate::sstable::naming::{
    bloom_filter_file, generation_files, metadata_file, spatial_index_file, sstable_file,
    TableName,
};
use crate::sstable::{KeyFilter, SSTableKeyIndexReader, SSTableMetadata, SSTableReader};
use crate::spatial::{RTreeSpatialIndex, SpatialIndexBuilder};

/// One sealed table generation opened for reading.
///
/// The spatial index is loaded on first use. Once the generation has been
/// retired by a compaction its files are deleted when the last handle to it
/// is dropped, so in-flight readers can finish undisturbed.
pub struct SealedTable {
    directory: PathBuf,
    table_name: TableName,
    sequence_number: u64,
    key_index: SSTableKeyIndexReader,
    key_filter: Option<KeyFilter>,
    metadata: Option<SSTableMetadata>,
    spatial_index: OnceLock<Arc<RTreeSpatialIndex>>,
    obsolete: AtomicBool,
}

impl SealedTable {
    /// Opens generation `sequence_number` of `table_name` below `directory`.
    pub fn open(directory: &Path, table_name: &TableName, sequence_number: u64) -> StorageResult<Self> {
        let reader = SSTableReader::open(
            table_name,
            sstable_file(directory, table_name, sequence_number),
        )?;
        let key_index = SSTableKeyIndexReader::open(reader)?;

        let bloom_path = bloom_filter_file(directory, table_name, sequence_number);
        let key_filter = if bloom_path.exists() {
            Some(KeyFilter::read_from(&bloom_path)?)
        } else {
            None
        };

        let meta_path = metadata_file(directory, table_name, sequence_number);
        let metadata = if meta_path.exists() {
            Some(SSTableMetadata::read_from(&meta_path)?)
        } else {
            None
        };

        Ok(SealedTable {
            directory: directory.to_path_buf(),
            table_name: table_name.clone(),
            sequence_number,
            key_index,
            key_filter,
            metadata,
            spatial_index: OnceLock::new(),
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn reader(&self) -> &SSTableReader {
        self.key_index.reader()
    }

    pub fn key_index(&self) -> &SSTableKeyIndexReader {
        &self.key_index
    }

    pub fn metadata(&self) -> Option<&SSTableMetadata> {
        self.metadata.as_ref()
    }

    /// False if the bloom filter rules out `key`. Always true without a filter.
    pub fn might_contain(&self, key: &str) -> bool {
        self.key_filter
            .as_ref()
            .map_or(true, |filter| filter.might_contain(key))
    }

    /// Version of `key` stored in this generation.
    pub fn get(&self, key: &str) -> StorageResult<Option<Tuple>> {
        if !self.might_contain(key) {
            return Ok(None);
        }
        self.key_index.get(key)
    }

    /// The spatial index of this generation, or `None` if none was written.
    pub fn spatial_index(&self) -> StorageResult<Option<Arc<RTreeSpatialIndex>>> {
        if let Some(tree) = self.spatial_index.get() {
            return Ok(Some(tree.clone()));
        }

        let path = spatial_index_file(&self.directory, &self.table_name, self.sequence_number);
        if !path.exists() {
            return Ok(None);
        }
        let tree = Arc::new(RTreeSpatialIndex::read_from_file(&path)?);
        Ok(Some(self.spatial_index.get_or_init(|| tree).clone()))
    }

    /// Schedules the files of this generation for deletion.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    /// Records of this generation whose box intersects `query`.
    fn intersecting(&self, query: &BoundingBox) -> StorageResult<Vec<Tuple>> {
        match self.spatial_index()? {
            Some(tree) => tree
                .entries_intersecting(query)
                .iter()
                .map(|entry| self.reader().read_at(entry.reference()))
                .collect(),
            None => {
                let mut result = Vec::new();
                for tuple in self.reader().iter()? {
                    let tuple = tuple?;
                    if tuple.bounding_box().intersects(query) {
                        result.push(tuple);
                    }
                }
                Ok(result)
            }
        }
    }
}

impl Drop for SealedTable {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        self.reader().close();
        for path in generation_files(&self.directory, &self.table_name, self.sequence_number) {
            if !path.exists() {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                log::error!("Unable to delete retired file {:?}: {}", path, e);
            }
        }
        log::debug!(
            "Deleted retired generation {} of table {}",
            self.sequence_number,
            self.table_name
        );
    }
}

/// The set of sealed tables that together hold the current content of a
/// table. Published atomically by the registry.
pub struct TableGeneration {
    table_name: TableName,
    directory: PathBuf,
    tables: Vec<Arc<SealedTable>>,
}

impl std::fmt::Debug for TableGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableGeneration")
            .field("table_name", &self.table_name)
            .field("directory", &self.directory)
            .field("sequence_numbers", &self.sequence_numbers())
            .finish()
    }
}

impl TableGeneration {
    pub(crate) fn new(table_name: TableName, directory: PathBuf, mut tables: Vec<Arc<SealedTable>>) -> Self {
        tables.sort_by_key(|table| table.sequence_number());
        TableGeneration {
            table_name,
            directory,
            tables,
        }
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    /// Storage directory holding the table.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Sealed tables, ascending by sequence number.
    pub fn tables(&self) -> &[Arc<SealedTable>] {
        &self.tables
    }

    pub fn sequence_numbers(&self) -> Vec<u64> {
        self.tables.iter().map(|table| table.sequence_number()).collect()
    }

    pub(crate) fn table(&self, sequence_number: u64) -> Option<&Arc<SealedTable>> {
        self.tables
            .iter()
            .find(|table| table.sequence_number() == sequence_number)
    }

    /// Newest version of `key`, tombstones included. Of two versions with the
    /// same timestamp the one from the later generation wins.
    pub fn newest_version(&self, key: &str) -> StorageResult<Option<Tuple>> {
        let mut newest: Option<Tuple> = None;
        for table in &self.tables {
            if let Some(tuple) = table.get(key)? {
                newest = match newest {
                    Some(current) if current.timestamp() > tuple.timestamp() => Some(current),
                    _ => Some(tuple),
                };
            }
        }
        Ok(newest)
    }

    /// Current value of `key`, `None` if it is absent or deleted.
    pub fn get(&self, key: &str) -> StorageResult<Option<Tuple>> {
        Ok(self
            .newest_version(key)?
            .filter(|tuple| !tuple.is_tombstone()))
    }

    /// Current values whose bounding box intersects `query`, sorted by key.
    pub fn query_bounding_box(&self, query: &BoundingBox) -> StorageResult<Vec<Tuple>> {
        let mut candidates = BTreeSet::new();
        for table in &self.tables {
            for tuple in table.intersecting(query)? {
                candidates.insert(tuple.key().to_string());
            }
        }

        let mut result = Vec::with_capacity(candidates.len());
        for key in candidates {
            if let Some(tuple) = self.get(&key)? {
                if tuple.bounding_box().intersects(query) {
                    result.push(tuple);
                }
            }
        }
        Ok(result)
    }

    /// Current values written after `timestamp`, sorted by key.
    pub fn query_newer_than(&self, timestamp: u64) -> StorageResult<Vec<Tuple>> {
        let mut newest: BTreeMap<String, Tuple> = BTreeMap::new();
        for table in &self.tables {
            // versions not newer than `timestamp` can neither be returned nor
            // shadow a version that is
            if let Some(metadata) = table.metadata() {
                if metadata.newest_timestamp <= timestamp {
                    continue;
                }
            }
            for tuple in table.reader().iter()? {
                let tuple = tuple?;
                let replace = newest
                    .get(tuple.key())
                    .map_or(true, |current| tuple.timestamp() >= current.timestamp());
                if replace {
                    newest.insert(tuple.key().to_string(), tuple);
                }
            }
        }

        Ok(newest
            .into_values()
            .filter(|tuple| !tuple.is_tombstone() && tuple.timestamp() > timestamp)
            .collect())
    }
}
