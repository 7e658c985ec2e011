use bboxkv::compact::{compact_table, CompactionRequest};
use bboxkv::config::StorageConfig;
use bboxkv::errors::StorageResult;
use bboxkv::registry::StorageRegistry;
use bboxkv::sstable::TableName;
use bboxkv::BoundingBox;
use bboxkv_int_test::test_util::{flush, random_point_tuples};

fn main() -> StorageResult<()> {
    println!("Starting stress test...");
    let dir = tempfile::tempdir()?;
    let registry = StorageRegistry::new(StorageConfig::new().with_storage_directory(dir.path()))?;
    let table = TableName::new("stress")?;

    let generations = 8;
    let per_generation = 50_000;
    let start = std::time::Instant::now();
    for generation in 0..generations {
        let tuples = random_point_tuples(per_generation, generation as u64 + 1, generation as u64);
        flush(&registry, &table, &tuples)?;
    }
    println!(
        "Flushed {} generations of {} tuples in {:?}",
        generations,
        per_generation,
        start.elapsed()
    );

    let start = std::time::Instant::now();
    let result = compact_table(&registry, &CompactionRequest::major(table.clone()))?;
    println!(
        "Compacted {} tuples into {} in {:?}",
        result.read_tuples,
        result.written_tuples,
        start.elapsed()
    );

    let generation = registry.current_generation(&table);
    let start = std::time::Instant::now();
    let window = BoundingBox::new(&[(0.0, 10.0), (0.0, 10.0)])?;
    let hits = match generation {
        Some(generation) => generation.query_bounding_box(&window)?.len(),
        None => 0,
    };
    println!("Found {} tuples in {} in {:?}", hits, window, start.elapsed());
    Ok(())
}
