use std::path::Path;
use std::sync::Arc;

use bboxkv::config::StorageConfig;
use bboxkv::errors::StorageResult;
use bboxkv::registry::StorageRegistry;
use bboxkv::sstable::naming::sstable_file;
use bboxkv::sstable::{SSTableKeyIndexReader, SSTableReader, SSTableWriter, TableName};
use bboxkv::{BoundingBox, Tuple};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// A registry rooted in a temporary directory that lives as long as the context.
pub struct TestContext {
    dir: TempDir,
    registry: Arc<StorageRegistry>,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry(&self) -> Arc<StorageRegistry> {
        self.registry.clone()
    }
}

pub fn create_test_context(compaction_workers: usize) -> StorageResult<TestContext> {
    let dir = tempfile::tempdir()?;
    let config = StorageConfig::new()
        .with_storage_directory(dir.path())
        .with_compaction_workers(compaction_workers);
    let registry = Arc::new(StorageRegistry::new(config)?);
    Ok(TestContext { dir, registry })
}

pub fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

pub fn point(key: &str, coordinates: &[f64], timestamp: u64) -> Tuple {
    Tuple::new(
        key,
        BoundingBox::point(coordinates),
        key.as_bytes().to_vec(),
        timestamp,
    )
}

/// `count` tuples with keys `key00000000..`, random 2D points in [0, 100)
/// and the same timestamp.
pub fn random_point_tuples(count: usize, timestamp: u64, seed: u64) -> Vec<Tuple> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let x = rng.gen_range(0.0..100.0);
            let y = rng.gen_range(0.0..100.0);
            point(&format!("key{:08}", i), &[x, y], timestamp)
        })
        .collect()
}

/// Writes `tuples` as a new generation of `table` and registers it.
pub fn flush(registry: &StorageRegistry, table: &TableName, tuples: &[Tuple]) -> StorageResult<u64> {
    let mut writer = registry.create_writer(table)?;
    writer.open()?;
    for tuple in tuples {
        writer.add_record(tuple)?;
    }
    writer.close()?;
    let sequence_number = writer.sequence_number();
    registry.register_sealed_table(table, sequence_number)?;
    Ok(sequence_number)
}

/// Writes `tuples` as generation `sequence_number` of `table` under `dir`
/// and opens it again.
pub fn write_table(
    dir: &Path,
    table: &TableName,
    sequence_number: u64,
    tuples: &[Tuple],
) -> StorageResult<SSTableKeyIndexReader> {
    let mut writer = SSTableWriter::new(dir, table, sequence_number);
    writer.open()?;
    for tuple in tuples {
        writer.add_record(tuple)?;
    }
    writer.close()?;
    open_table(dir, table, sequence_number)
}

pub fn open_table(dir: &Path, table: &TableName, sequence_number: u64) -> StorageResult<SSTableKeyIndexReader> {
    let reader = SSTableReader::open(table, sstable_file(dir, table, sequence_number))?;
    SSTableKeyIndexReader::open(reader)
}

pub fn read_all(index: &SSTableKeyIndexReader) -> StorageResult<Vec<Tuple>> {
    index.iter()?.collect()
}
