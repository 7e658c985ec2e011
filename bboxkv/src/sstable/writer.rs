//! Writer producing one sealed table generation.
//!
//! All files are first written under a temporary name and renamed when the
//! writer is closed, the data file last. A generation is therefore visible to
//! directory scans only once every file belonging to it is complete.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::bloom_filter::KeyFilter;
use super::codec;
use super::metadata::SSTableMetadata;
use super::naming::{
    bloom_filter_file, generation_files, key_index_file, metadata_file, spatial_index_file,
    sstable_file, table_dir, TableName,
};
use super::sstable_constants::{MAGIC_BYTES, MAGIC_BYTES_INDEX, TMP_FILE_SUFFIX};
use crate::config::StorageConfig;
use crate::entity::Tuple;
use crate::errors::{ErrorKind, StorageError, StorageResult};
use crate::spatial::{RTreeSpatialIndex, SpatialIndexBuilder, SpatialIndexEntry, DEFAULT_NODE_SIZE};

/// Writes the records of one generation in ascending key order.
///
/// Usage: create with [`SSTableWriter::new`], call [`open`](Self::open),
/// add records with [`add_record`](Self::add_record) and seal the
/// generation with [`close`](Self::close). Dropping a writer that was not
/// closed discards its temporary files.
pub struct SSTableWriter {
    directory: PathBuf,
    table_name: TableName,
    sequence_number: u64,
    write_key_index: bool,
    write_bloom_filter: bool,
    build_spatial_index: bool,
    rtree_max_node_size: usize,
    state: Option<OpenState>,
    sealed: bool,
}

struct OpenState {
    data: BufWriter<File>,
    key_index: Option<BufWriter<File>>,
    spatial_index: Option<RTreeSpatialIndex>,
    /// Keys for the bloom filter, which is sized once the count is known
    bloom_keys: Option<Vec<String>>,
    position: u64,
    last_key: Option<String>,
    metadata: SSTableMetadata,
}

impl SSTableWriter {
    /// Creates a writer for generation `sequence_number` of `table_name`
    /// below the storage directory `directory`.
    pub fn new(directory: &Path, table_name: &TableName, sequence_number: u64) -> Self {
        SSTableWriter {
            directory: directory.to_path_buf(),
            table_name: table_name.clone(),
            sequence_number,
            write_key_index: true,
            write_bloom_filter: true,
            build_spatial_index: true,
            rtree_max_node_size: DEFAULT_NODE_SIZE,
            state: None,
            sealed: false,
        }
    }

    /// Creates a writer whose index settings follow `config`.
    pub fn from_config(
        config: &StorageConfig,
        directory: &Path,
        table_name: &TableName,
        sequence_number: u64,
    ) -> Self {
        Self::new(directory, table_name, sequence_number)
            .with_key_index(config.write_key_index())
            .with_bloom_filter(config.write_bloom_filter())
            .with_spatial_index(config.build_spatial_index())
            .with_rtree_max_node_size(config.rtree_max_node_size())
    }

    pub fn with_key_index(mut self, enabled: bool) -> Self {
        self.write_key_index = enabled;
        self
    }

    pub fn with_bloom_filter(mut self, enabled: bool) -> Self {
        self.write_bloom_filter = enabled;
        self
    }

    pub fn with_spatial_index(mut self, enabled: bool) -> Self {
        self.build_spatial_index = enabled;
        self
    }

    pub fn with_rtree_max_node_size(mut self, max_node_size: usize) -> Self {
        self.rtree_max_node_size = max_node_size;
        self
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Final path of the data file.
    pub fn data_file(&self) -> PathBuf {
        sstable_file(&self.directory, &self.table_name, self.sequence_number)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Metadata of the records added so far.
    pub fn metadata(&self) -> Option<&SSTableMetadata> {
        self.state.as_ref().map(|state| &state.metadata)
    }

    /// Creates the temporary files and writes their signatures.
    ///
    /// # Errors
    ///
    /// * `InvalidOperation` if the writer is already open or closed, or the
    ///   generation already exists on disk
    /// * `ValidationError` if the R-tree node size is invalid
    /// * `IOError` if the files cannot be created
    pub fn open(&mut self) -> StorageResult<()> {
        if self.state.is_some() || self.sealed {
            return Err(StorageError::new(
                &format!("Writer for {:?} was already opened", self.data_file()),
                ErrorKind::InvalidOperation,
            ));
        }
        if self.data_file().exists() {
            return Err(StorageError::new(
                &format!("Table file {:?} already exists", self.data_file()),
                ErrorKind::InvalidOperation,
            ));
        }

        let spatial_index = if self.build_spatial_index {
            let tree = RTreeSpatialIndex::with_max_node_size(self.rtree_max_node_size)
                .map_err(|e| StorageError::new(&e.to_string(), ErrorKind::ValidationError))?;
            Some(tree)
        } else {
            None
        };

        fs::create_dir_all(table_dir(&self.directory, &self.table_name))?;

        let mut data = BufWriter::new(File::create(tmp_path(&self.data_file()))?);
        data.write_all(MAGIC_BYTES)?;

        let key_index = if self.write_key_index {
            let path = key_index_file(&self.directory, &self.table_name, self.sequence_number);
            let mut key_index = BufWriter::new(File::create(tmp_path(&path))?);
            key_index.write_all(MAGIC_BYTES_INDEX)?;
            Some(key_index)
        } else {
            None
        };

        log::debug!("Opened writer for {:?}", self.data_file());
        self.state = Some(OpenState {
            data,
            key_index,
            spatial_index,
            bloom_keys: self.write_bloom_filter.then(Vec::new),
            position: MAGIC_BYTES.len() as u64,
            last_key: None,
            metadata: SSTableMetadata::default(),
        });
        Ok(())
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// * `InvalidOperation` if the writer is not open or the key does not
    ///   ascend
    /// * `ValidationError` if the record cannot be encoded, or its box has a
    ///   different dimension than the boxes added before it
    pub fn add_record(&mut self, tuple: &Tuple) -> StorageResult<()> {
        let Some(state) = self.state.as_mut() else {
            return Err(StorageError::new(
                "Writer is not open",
                ErrorKind::InvalidOperation,
            ));
        };

        if let Some(last_key) = &state.last_key {
            if tuple.key() <= last_key.as_str() {
                return Err(StorageError::new(
                    &format!(
                        "Keys must be strictly ascending: {} after {}",
                        tuple.key(),
                        last_key
                    ),
                    ErrorKind::InvalidOperation,
                ));
            }
        }

        let offset = state.position;
        let index_offset = u32::try_from(offset);
        if state.key_index.is_some() && index_offset.is_err() {
            return Err(StorageError::new(
                &format!("Record offset {} exceeds the key index range", offset),
                ErrorKind::InvalidOperation,
            ));
        }

        let indexed = !tuple.is_tombstone() && !tuple.bounding_box().is_empty();
        let dimension = tuple.bounding_box().dimension();
        if indexed && state.metadata.dimension != 0 && state.metadata.dimension != dimension {
            return Err(StorageError::new(
                &format!(
                    "Key {} has a box of dimension {}, the table has dimension {}",
                    tuple.key(),
                    dimension,
                    state.metadata.dimension
                ),
                ErrorKind::ValidationError,
            ));
        }

        let record = codec::encode(tuple)?;

        // nothing is written unless the record is indexed as well
        if let Some(spatial_index) = state.spatial_index.as_mut() {
            if indexed
                && !spatial_index.insert(SpatialIndexEntry::new(tuple.bounding_box().clone(), offset))
            {
                return Err(StorageError::new(
                    &format!("Unable to index the box of key {}", tuple.key()),
                    ErrorKind::ValidationError,
                ));
            }
        }

        state.data.write_all(&record)?;
        state.position += record.len() as u64;
        if let (Some(key_index), Ok(index_offset)) = (state.key_index.as_mut(), index_offset) {
            key_index.write_all(&index_offset.to_be_bytes())?;
        }
        if let Some(bloom_keys) = state.bloom_keys.as_mut() {
            bloom_keys.push(tuple.key().to_string());
        }

        state.metadata.update(tuple);
        state.last_key = Some(tuple.key().to_string());
        Ok(())
    }

    /// Flushes all files, writes the indexes and makes the generation
    /// visible. Returns the path of the data file.
    pub fn close(&mut self) -> StorageResult<PathBuf> {
        let Some(state) = self.state.take() else {
            return Err(StorageError::new(
                "Writer is not open",
                ErrorKind::InvalidOperation,
            ));
        };

        match self.seal(state) {
            Ok(path) => {
                self.sealed = true;
                Ok(path)
            }
            Err(e) => {
                log::error!("Unable to seal {:?}: {}", self.data_file(), e);
                self.remove_tmp_files();
                self.remove_renamed_side_files();
                Err(e)
            }
        }
    }

    fn seal(&self, state: OpenState) -> StorageResult<PathBuf> {
        let OpenState {
            mut data,
            key_index,
            spatial_index,
            bloom_keys,
            metadata,
            ..
        } = state;

        data.flush()?;
        data.get_ref().sync_all()?;
        drop(data);

        let mut finished = Vec::new();
        if let Some(mut key_index) = key_index {
            key_index.flush()?;
            key_index.get_ref().sync_all()?;
            finished.push(key_index_file(&self.directory, &self.table_name, self.sequence_number));
        }

        if let Some(spatial_index) = spatial_index {
            let path = spatial_index_file(&self.directory, &self.table_name, self.sequence_number);
            spatial_index.write_to_file(&tmp_path(&path))?;
            finished.push(path);
        }

        if let Some(bloom_keys) = bloom_keys {
            let path = bloom_filter_file(&self.directory, &self.table_name, self.sequence_number);
            KeyFilter::build(bloom_keys.iter().map(String::as_str), bloom_keys.len())?
                .write_to(&tmp_path(&path))?;
            finished.push(path);
        }

        let meta_path = metadata_file(&self.directory, &self.table_name, self.sequence_number);
        metadata.write_to(&tmp_path(&meta_path))?;
        finished.push(meta_path);

        let data_path = self.data_file();
        finished.push(data_path.clone());
        for path in &finished {
            fs::rename(tmp_path(path), path)?;
        }

        log::debug!(
            "Sealed {:?} with {} records ({} tombstones)",
            data_path,
            metadata.tuples,
            metadata.tombstones
        );
        Ok(data_path)
    }

    /// Discards everything written so far.
    pub fn abort(&mut self) {
        if self.state.take().is_some() {
            log::debug!("Aborting writer for {:?}", self.data_file());
            self.remove_tmp_files();
        }
    }

    fn remove_tmp_files(&self) {
        for path in generation_files(&self.directory, &self.table_name, self.sequence_number) {
            let tmp = tmp_path(&path);
            if tmp.exists() {
                if let Err(e) = fs::remove_file(&tmp) {
                    log::error!("Unable to remove temporary file {:?}: {}", tmp, e);
                }
            }
        }
    }

    /// Side files renamed before sealing failed. The data file is renamed
    /// last, so it never exists at this point.
    fn remove_renamed_side_files(&self) {
        for path in generation_files(&self.directory, &self.table_name, self.sequence_number)
            .into_iter()
            .skip(1)
        {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    log::error!("Unable to remove partial file {:?}: {}", path, e);
                }
            }
        }
    }
}

impl Drop for SSTableWriter {
    fn drop(&mut self) {
        if self.state.is_some() {
            log::warn!("Writer for {:?} dropped without close", self.data_file());
            self.abort();
        }
    }
}

/// `path` with the temporary suffix appended, e.g. `sstable_t_1.sst.tmp`.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_FILE_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BoundingBox;
    use crate::sstable::key_index::SSTableKeyIndexReader;
    use crate::sstable::reader::SSTableReader;
    use tempfile::tempdir;

    fn table() -> TableName {
        TableName::new("writer_test").unwrap()
    }

    fn tuple(key: &str, x: f64, timestamp: u64) -> Tuple {
        Tuple::new(key, BoundingBox::point(&[x, x]), key.as_bytes().to_vec(), timestamp)
    }

    #[test]
    fn test_write_all_files() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 3);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 10)).unwrap();
        writer.add_record(&Tuple::tombstone("b", 11)).unwrap();
        writer.add_record(&tuple("c", 3.0, 12)).unwrap();
        let path = writer.close().unwrap();

        assert_eq!(path, sstable_file(dir.path(), &table(), 3));
        assert!(path.exists());
        assert!(key_index_file(dir.path(), &table(), 3).exists());
        assert!(spatial_index_file(dir.path(), &table(), 3).exists());
        assert!(metadata_file(dir.path(), &table(), 3).exists());
        assert!(bloom_filter_file(dir.path(), &table(), 3).exists());

        let leftovers: Vec<_> = fs::read_dir(table_dir(dir.path(), &table()))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(TMP_FILE_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);

        let metadata = SSTableMetadata::read_from(&metadata_file(dir.path(), &table(), 3)).unwrap();
        assert_eq!(metadata.tuples, 3);
        assert_eq!(metadata.tombstones, 1);
        assert_eq!(metadata.oldest_timestamp, 10);
        assert_eq!(metadata.newest_timestamp, 12);
    }

    #[test]
    fn test_spatial_index_references_records() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1).with_rtree_max_node_size(4);
        writer.open().unwrap();
        for i in 0..30 {
            writer.add_record(&tuple(&format!("key{:03}", i), i as f64, i)).unwrap();
        }
        writer.add_record(&Tuple::tombstone("key999", 40)).unwrap();
        writer.close().unwrap();

        let tree =
            RTreeSpatialIndex::read_from_file(&spatial_index_file(dir.path(), &table(), 1)).unwrap();
        assert_eq!(tree.len(), 30);
        assert_eq!(tree.max_node_size(), 4);

        let reader = SSTableReader::open(&table(), sstable_file(dir.path(), &table(), 1)).unwrap();
        let query = BoundingBox::new(&[(9.5, 12.5), (9.5, 12.5)]).unwrap();
        let mut keys: Vec<String> = tree
            .entries_intersecting(&query)
            .iter()
            .map(|entry| reader.read_at(entry.reference()).unwrap().key().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["key010", "key011", "key012"]);
    }

    #[test]
    fn test_disabled_indexes() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1)
            .with_key_index(false)
            .with_bloom_filter(false)
            .with_spatial_index(false);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();
        writer.close().unwrap();

        assert!(!key_index_file(dir.path(), &table(), 1).exists());
        assert!(!bloom_filter_file(dir.path(), &table(), 1).exists());
        assert!(!spatial_index_file(dir.path(), &table(), 1).exists());
        assert!(metadata_file(dir.path(), &table(), 1).exists());
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new()
            .with_storage_directory(dir.path())
            .with_key_index(false)
            .with_rtree_max_node_size(1);
        let mut writer = SSTableWriter::from_config(&config, dir.path(), &table(), 1);
        let err = writer.open().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_keys_must_ascend() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1);
        writer.open().unwrap();
        writer.add_record(&tuple("b", 1.0, 1)).unwrap();

        let err = writer.add_record(&tuple("a", 1.0, 1)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        let err = writer.add_record(&tuple("b", 1.0, 2)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_table_dimension_is_fixed() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();

        let cube = Tuple::new("b", BoundingBox::point(&[1.0, 1.0, 1.0]), vec![], 1);
        let err = writer.add_record(&cube).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);

        // rejected records leave no trace, the key can still be written
        writer.add_record(&Tuple::tombstone("b", 2)).unwrap();
        writer.add_record(&Tuple::new("c", BoundingBox::empty(), vec![1], 3)).unwrap();
        writer.add_record(&tuple("d", 2.0, 4)).unwrap();
        writer.close().unwrap();

        let reader = SSTableReader::open(&table(), sstable_file(dir.path(), &table(), 1)).unwrap();
        let keys: Vec<String> = reader
            .iter()
            .unwrap()
            .map(|t| t.unwrap().key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
        let tree =
            RTreeSpatialIndex::read_from_file(&spatial_index_file(dir.path(), &table(), 1)).unwrap();
        assert_eq!(tree.len(), 2);
        let metadata = SSTableMetadata::read_from(&metadata_file(dir.path(), &table(), 1)).unwrap();
        assert_eq!(metadata.dimension, 2);
    }

    #[test]
    fn test_dimension_is_checked_without_spatial_index() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1).with_spatial_index(false);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();
        let line = Tuple::new("b", BoundingBox::point(&[1.0]), vec![], 1);
        assert_eq!(
            writer.add_record(&line).unwrap_err().kind(),
            &ErrorKind::ValidationError
        );
    }

    #[test]
    fn test_lifecycle_errors() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1);
        assert!(writer.add_record(&tuple("a", 1.0, 1)).is_err());
        assert!(writer.close().is_err());

        writer.open().unwrap();
        assert!(writer.open().is_err());
        writer.close().unwrap();
        assert!(writer.open().is_err());

        let mut again = SSTableWriter::new(dir.path(), &table(), 1);
        let err = again.open().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_unsealed_generation_is_invisible() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 2);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();

        assert!(!writer.data_file().exists());
        assert!(tmp_path(&writer.data_file()).exists());
        assert!(crate::sstable::naming::list_sequence_numbers(dir.path(), &table())
            .unwrap()
            .is_empty());

        drop(writer);
        let remaining = fs::read_dir(table_dir(dir.path(), &table())).unwrap().count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_bloom_filter_holds_written_keys() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 1);
        writer.open().unwrap();
        for i in 0..200 {
            writer.add_record(&tuple(&format!("key{:03}", i), i as f64, i)).unwrap();
        }
        writer.close().unwrap();

        let filter = KeyFilter::read_from(&bloom_filter_file(dir.path(), &table(), 1)).unwrap();
        assert!((0..200).all(|i| filter.might_contain(&format!("key{:03}", i))));
        let misses = (0..200)
            .filter(|i| !filter.might_contain(&format!("other{:03}", i)))
            .count();
        assert!(misses > 150, "only {} misses", misses);
    }

    #[test]
    fn test_failed_seal_removes_renamed_side_files() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 4);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();

        // the data file cannot be renamed onto a directory
        fs::create_dir(writer.data_file()).unwrap();
        assert!(writer.close().is_err());

        for path in generation_files(dir.path(), &table(), 4).into_iter().skip(1) {
            assert!(!path.exists(), "{:?}", path);
            assert!(!tmp_path(&path).exists(), "{:?}", path);
        }
        assert!(!tmp_path(&writer.data_file()).exists());
        assert!(writer.data_file().is_dir());
    }

    #[test]
    fn test_abort() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 2);
        writer.open().unwrap();
        writer.add_record(&tuple("a", 1.0, 1)).unwrap();
        writer.abort();

        assert!(!writer.is_open());
        assert!(!tmp_path(&writer.data_file()).exists());
        assert!(!writer.data_file().exists());
    }

    #[test]
    fn test_empty_generation() {
        let dir = tempdir().unwrap();
        let mut writer = SSTableWriter::new(dir.path(), &table(), 9);
        writer.open().unwrap();
        writer.close().unwrap();

        let reader = SSTableReader::open(&table(), sstable_file(dir.path(), &table(), 9)).unwrap();
        assert_eq!(reader.iter().unwrap().count(), 0);
        let index = SSTableKeyIndexReader::open(reader).unwrap();
        assert_eq!(index.len(), Some(0));
    }

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/d/t/sstable_t_1.sst")),
            PathBuf::from("/d/t/sstable_t_1.sst.tmp")
        );
    }
}
