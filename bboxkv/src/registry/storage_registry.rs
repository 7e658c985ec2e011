use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::table_generation::{SealedTable, TableGeneration};
use crate::config::StorageConfig;
use crate::errors::{ErrorKind, StorageError, StorageResult};
use crate::sstable::naming::{list_sequence_numbers, table_dir, TableName};
use crate::sstable::sstable_constants::TMP_FILE_SUFFIX;
use crate::sstable::SSTableWriter;

/// Tracks where tables live and which generation of each table is visible.
///
/// One registry is created at startup and shared (usually behind an `Arc`)
/// with every component that needs table locations or lifecycle
/// information. Lookups return an `Arc<TableGeneration>` snapshot; a
/// concurrent [`publish_generation`](Self::publish_generation) replaces the
/// snapshot atomically and never changes one that was already handed out.
pub struct StorageRegistry {
    config: StorageConfig,
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    locations: HashMap<TableName, PathBuf>,
    generations: HashMap<TableName, Arc<TableGeneration>>,
    next_sequence_numbers: HashMap<TableName, u64>,
}

impl StorageRegistry {
    /// Validates `config`, creates missing storage directories and loads
    /// every table found in them.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        let mut state = RegistryState::default();
        for directory in config.storage_directories() {
            fs::create_dir_all(directory)?;
            scan_directory(directory, &mut state)?;
        }
        log::info!(
            "Storage registry started with {} tables in {} directories",
            state.locations.len(),
            config.storage_directories().len()
        );

        Ok(StorageRegistry {
            config,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Storage directory of `table`, assigning one on first use.
    ///
    /// New tables go to the directory holding the fewest tables; ties are
    /// resolved in configuration order.
    pub fn assign_location(&self, table: &TableName) -> StorageResult<PathBuf> {
        if let Some(location) = self.location(table) {
            return Ok(location);
        }

        let mut state = self.state.write();
        if let Some(location) = state.locations.get(table) {
            return Ok(location.clone());
        }

        let location = self
            .config
            .storage_directories()
            .iter()
            .min_by_key(|directory| {
                state
                    .locations
                    .values()
                    .filter(|location| location == directory)
                    .count()
            })
            .cloned()
            .ok_or_else(|| {
                StorageError::new("No storage directory configured", ErrorKind::ValidationError)
            })?;

        log::debug!("Assigned table {} to {:?}", table, location);
        state.locations.insert(table.clone(), location.clone());
        Ok(location)
    }

    /// Storage directory of `table`, if it has one.
    pub fn location(&self, table: &TableName) -> Option<PathBuf> {
        self.state.read().locations.get(table).cloned()
    }

    fn require_location(&self, table: &TableName) -> StorageResult<PathBuf> {
        self.location(table).ok_or_else(|| no_location_error(table))
    }

    /// Reserves the next unused sequence number of `table`.
    pub fn next_sequence_number(&self, table: &TableName) -> u64 {
        let mut state = self.state.write();
        let next = state.next_sequence_numbers.entry(table.clone()).or_insert(1);
        let sequence_number = *next;
        *next += 1;
        sequence_number
    }

    /// Creates an unopened writer for the next generation of `table`.
    pub fn create_writer(&self, table: &TableName) -> StorageResult<SSTableWriter> {
        let directory = self.assign_location(table)?;
        let sequence_number = self.next_sequence_number(table);
        Ok(SSTableWriter::from_config(
            &self.config,
            &directory,
            table,
            sequence_number,
        ))
    }

    /// The visible generation of `table`.
    pub fn current_generation(&self, table: &TableName) -> Option<Arc<TableGeneration>> {
        self.state.read().generations.get(table).cloned()
    }

    /// Adds a freshly sealed table to the visible generation.
    pub fn register_sealed_table(
        &self,
        table: &TableName,
        sequence_number: u64,
    ) -> StorageResult<Arc<TableGeneration>> {
        let directory = self.require_location(table)?;
        let sealed = Arc::new(SealedTable::open(&directory, table, sequence_number)?);

        let mut state = self.state.write();
        let mut sequence_numbers = live_sequence_numbers(&state, table);
        sequence_numbers.push(sequence_number);
        swap(&mut state, table, &sequence_numbers, &[], vec![sealed])
    }

    /// Replaces the sealed tables `inputs` with the compacted table `output`.
    ///
    /// The edit is applied to the generation that is visible when the swap
    /// happens, so tables registered while `output` was being written stay
    /// visible. Retired inputs are deleted once no reader holds them anymore.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the table has no location
    /// * `InvalidOperation` if one of `inputs` is no longer live
    /// * any error raised while opening `output`; the visible generation is
    ///   unchanged in that case
    pub fn replace_tables(
        &self,
        table: &TableName,
        inputs: &[u64],
        output: u64,
    ) -> StorageResult<Arc<TableGeneration>> {
        let directory = self.require_location(table)?;
        let sealed = Arc::new(SealedTable::open(&directory, table, output)?);

        let mut state = self.state.write();
        let live = live_sequence_numbers(&state, table);
        if let Some(sequence) = inputs.iter().find(|s| !live.contains(s)) {
            return Err(StorageError::new(
                &format!("Generation {} of table {} is not live", sequence, table),
                ErrorKind::InvalidOperation,
            ));
        }
        let mut next: Vec<u64> = live
            .into_iter()
            .filter(|sequence| !inputs.contains(sequence))
            .collect();
        next.push(output);
        swap(&mut state, table, &next, inputs, vec![sealed])
    }

    /// Atomically replaces the visible generation of `table`.
    ///
    /// `sequence_numbers` is the complete list of sealed tables in the new
    /// generation. Every table of the current generation must either stay in
    /// that list or be listed in `retired`; retired tables are deleted once
    /// no reader holds them anymore.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the table has no location
    /// * `InvalidOperation` if `retired` does not match the current generation
    /// * any error raised while opening the new tables; the visible
    ///   generation is unchanged in that case
    pub fn publish_generation(
        &self,
        table: &TableName,
        sequence_numbers: &[u64],
        retired: &[u64],
    ) -> StorageResult<Arc<TableGeneration>> {
        let directory = self.require_location(table)?;
        let current = self.current_generation(table);

        // file IO happens before the write lock is taken
        let mut opened = Vec::new();
        for &sequence in sequence_numbers {
            let known = current
                .as_ref()
                .is_some_and(|generation| generation.table(sequence).is_some());
            if !known {
                opened.push(Arc::new(SealedTable::open(&directory, table, sequence)?));
            }
        }

        let mut state = self.state.write();
        swap(&mut state, table, sequence_numbers, retired, opened)
    }

    /// Forgets `table` and deletes its files once no reader holds them.
    /// Returns false if the table is unknown.
    pub fn delete_table(&self, table: &TableName) -> bool {
        let (location, generation) = {
            let mut state = self.state.write();
            state.next_sequence_numbers.remove(table);
            (state.locations.remove(table), state.generations.remove(table))
        };
        let Some(location) = location else {
            return false;
        };

        if let Some(generation) = generation {
            for sealed in generation.tables() {
                sealed.mark_obsolete();
            }
        }

        // only succeeds once the last reader has released the files
        let dir = table_dir(&location, table);
        if let Err(e) = fs::remove_dir(&dir) {
            log::debug!("Table directory {:?} not removed yet: {}", dir, e);
        }
        log::info!("Deleted table {}", table);
        true
    }

    /// All known tables, sorted by name.
    pub fn all_tables(&self) -> Vec<TableName> {
        let mut tables: Vec<TableName> = self.state.read().locations.keys().cloned().collect();
        tables.sort();
        tables
    }
}

fn live_sequence_numbers(state: &RegistryState, table: &TableName) -> Vec<u64> {
    state
        .generations
        .get(table)
        .map(|generation| generation.sequence_numbers())
        .unwrap_or_default()
}

fn no_location_error(table: &TableName) -> StorageError {
    StorageError::new(
        &format!("Table {} has no storage location", table),
        ErrorKind::NotFound,
    )
}

/// Installs the generation made of `sequence_numbers`. Must be called with
/// the registry write lock held; tables that are not part of the current
/// generation have to be passed in `opened`.
fn swap(
    state: &mut RegistryState,
    table: &TableName,
    sequence_numbers: &[u64],
    retired: &[u64],
    opened: Vec<Arc<SealedTable>>,
) -> StorageResult<Arc<TableGeneration>> {
    let directory = state
        .locations
        .get(table)
        .cloned()
        .ok_or_else(|| no_location_error(table))?;

    let current = state.generations.get(table).cloned();
    let live: BTreeSet<u64> = live_sequence_numbers(state, table).into_iter().collect();
    let next: BTreeSet<u64> = sequence_numbers.iter().copied().collect();
    let retired: BTreeSet<u64> = retired.iter().copied().collect();

    let invalid = |message: String| -> StorageResult<Arc<TableGeneration>> {
        Err(StorageError::new(&message, ErrorKind::InvalidOperation))
    };
    if let Some(sequence) = retired.iter().find(|s| !live.contains(s)) {
        return invalid(format!("Generation {} of table {} is not live", sequence, table));
    }
    if let Some(sequence) = retired.iter().find(|s| next.contains(s)) {
        return invalid(format!("Generation {} of table {} is retired and kept", sequence, table));
    }
    if let Some(sequence) = live.iter().find(|s| !next.contains(s) && !retired.contains(s)) {
        return invalid(format!("Generation {} of table {} would be dropped", sequence, table));
    }

    let mut tables = Vec::with_capacity(next.len());
    for &sequence in &next {
        let existing = current
            .as_ref()
            .and_then(|generation| generation.table(sequence).cloned())
            .or_else(|| {
                opened
                    .iter()
                    .find(|sealed| sealed.sequence_number() == sequence)
                    .cloned()
            });
        match existing {
            Some(sealed) => tables.push(sealed),
            None => {
                return invalid(format!(
                    "Generation {} of table {} was retired concurrently",
                    sequence, table
                ))
            }
        }
    }

    if let Some(current) = &current {
        for &sequence in &retired {
            if let Some(sealed) = current.table(sequence) {
                sealed.mark_obsolete();
            }
        }
    }

    if let Some(&highest) = next.iter().next_back() {
        let counter = state.next_sequence_numbers.entry(table.clone()).or_insert(1);
        *counter = (*counter).max(highest + 1);
    }

    let generation = Arc::new(TableGeneration::new(table.clone(), directory, tables));
    state.generations.insert(table.clone(), generation.clone());
    log::info!(
        "Published generation of table {}: {:?}, retired {:?}",
        table,
        next,
        retired
    );
    Ok(generation)
}

/// Registers every table stored below `directory`.
fn scan_directory(directory: &Path, state: &mut RegistryState) -> StorageResult<()> {
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Ok(table) = TableName::new(&name) else {
            log::warn!("Ignoring directory {:?}: not a table name", entry.path());
            continue;
        };
        if let Some(existing) = state.locations.get(&table) {
            log::warn!(
                "Table {} found in {:?} and {:?}, using the first",
                table,
                existing,
                directory
            );
            continue;
        }

        remove_stale_tmp_files(&entry.path())?;

        let mut tables = Vec::new();
        for sequence in list_sequence_numbers(directory, &table)? {
            match SealedTable::open(directory, &table, sequence) {
                Ok(sealed) => tables.push(Arc::new(sealed)),
                Err(e) => log::error!(
                    "Unable to open generation {} of table {}: {}",
                    sequence,
                    table,
                    e
                ),
            }
        }

        let next = tables
            .iter()
            .map(|sealed| sealed.sequence_number() + 1)
            .max()
            .unwrap_or(1);
        log::debug!(
            "Found table {} in {:?} with {} generations",
            table,
            directory,
            tables.len()
        );

        state.next_sequence_numbers.insert(table.clone(), next);
        state.locations.insert(table.clone(), directory.to_path_buf());
        if !tables.is_empty() {
            state.generations.insert(
                table.clone(),
                Arc::new(TableGeneration::new(table, directory.to_path_buf(), tables)),
            );
        }
    }
    Ok(())
}

/// Removes files of writers that never completed.
fn remove_stale_tmp_files(dir: &Path) -> StorageResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_tmp = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TMP_FILE_SUFFIX));
        if is_tmp {
            log::debug!("Removing stale temporary file {:?}", path);
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{BoundingBox, Tuple};
    use crate::sstable::naming::{generation_files, sstable_file};
    use tempfile::tempdir;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn value(key: &str, x: f64, timestamp: u64) -> Tuple {
        Tuple::new(key, BoundingBox::point(&[x, x]), key.as_bytes().to_vec(), timestamp)
    }

    fn registry(dirs: &[&Path]) -> StorageRegistry {
        let mut config = StorageConfig::new().with_rtree_max_node_size(4);
        for dir in dirs {
            config = config.with_storage_directory(dir);
        }
        StorageRegistry::new(config).unwrap()
    }

    fn write(registry: &StorageRegistry, table: &TableName, tuples: &[Tuple]) -> u64 {
        let mut writer = registry.create_writer(table).unwrap();
        writer.open().unwrap();
        for tuple in tuples {
            writer.add_record(tuple).unwrap();
        }
        writer.close().unwrap();
        writer.sequence_number()
    }

    #[test]
    fn test_requires_directory() {
        let err = StorageRegistry::new(StorageConfig::new()).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_assign_location_balances_directories() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let registry = registry(&[first.path(), second.path()]);

        let a = registry.assign_location(&table("a")).unwrap();
        let b = registry.assign_location(&table("b")).unwrap();
        let c = registry.assign_location(&table("c")).unwrap();
        assert_eq!(a, first.path());
        assert_eq!(b, second.path());
        assert_eq!(c, first.path());

        // stable once assigned
        assert_eq!(registry.assign_location(&table("b")).unwrap(), second.path());
        assert_eq!(registry.location(&table("a")), Some(first.path().to_path_buf()));
        assert_eq!(registry.location(&table("zzz")), None);
        assert_eq!(registry.all_tables(), vec![table("a"), table("b"), table("c")]);
    }

    #[test]
    fn test_sequence_numbers_are_unique() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");
        assert_eq!(registry.next_sequence_number(&t), 1);
        assert_eq!(registry.next_sequence_number(&t), 2);
        assert_eq!(registry.next_sequence_number(&table("other")), 1);
    }

    #[test]
    fn test_register_and_lookup() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");
        assert!(registry.current_generation(&t).is_none());

        let first = write(&registry, &t, &[value("a", 1.0, 1), value("b", 2.0, 1)]);
        registry.register_sealed_table(&t, first).unwrap();
        let second = write(&registry, &t, &[value("a", 5.0, 2), Tuple::tombstone("b", 2)]);
        let generation = registry.register_sealed_table(&t, second).unwrap();

        assert_eq!(generation.sequence_numbers(), vec![first, second]);
        assert_eq!(generation.get("a").unwrap().unwrap().timestamp(), 2);
        assert!(generation.get("b").unwrap().is_none());
        assert!(generation.newest_version("b").unwrap().unwrap().is_tombstone());
        assert!(generation.get("c").unwrap().is_none());
    }

    #[test]
    fn test_publish_swaps_atomically_and_defers_deletion() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");

        let first = write(&registry, &t, &[value("a", 1.0, 1)]);
        let second = write(&registry, &t, &[value("b", 2.0, 2)]);
        registry.publish_generation(&t, &[first, second], &[]).unwrap();
        let old = registry.current_generation(&t).unwrap();

        let merged = write(&registry, &t, &[value("a", 1.0, 1), value("b", 2.0, 2)]);
        let new = registry
            .publish_generation(&t, &[merged], &[first, second])
            .unwrap();
        assert_eq!(new.sequence_numbers(), vec![merged]);
        assert_eq!(
            registry.current_generation(&t).unwrap().sequence_numbers(),
            vec![merged]
        );

        // the old snapshot still works and still owns its files
        assert_eq!(old.sequence_numbers(), vec![first, second]);
        assert_eq!(old.get("b").unwrap().unwrap().key(), "b");
        assert!(sstable_file(dir.path(), &t, first).exists());
        assert!(old.tables()[0].is_obsolete());

        drop(old);
        for path in generation_files(dir.path(), &t, first)
            .into_iter()
            .chain(generation_files(dir.path(), &t, second))
        {
            assert!(!path.exists(), "{:?}", path);
        }
        assert!(sstable_file(dir.path(), &t, merged).exists());
    }

    #[test]
    fn test_publish_validation() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");

        let err = registry.publish_generation(&t, &[1], &[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound);

        let first = write(&registry, &t, &[value("a", 1.0, 1)]);
        registry.publish_generation(&t, &[first], &[]).unwrap();

        // retiring a table that is not live
        let err = registry.publish_generation(&t, &[first], &[99]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        // keeping and retiring the same table
        let err = registry.publish_generation(&t, &[first], &[first]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        // silently dropping a live table
        let err = registry.publish_generation(&t, &[], &[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        // a table that was never written
        let err = registry.publish_generation(&t, &[first, 42], &[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::FileNotFound);

        assert_eq!(
            registry.current_generation(&t).unwrap().sequence_numbers(),
            vec![first]
        );
    }

    #[test]
    fn test_replace_tables_keeps_tables_registered_meanwhile() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");

        let first = write(&registry, &t, &[value("a", 1.0, 1)]);
        registry.register_sealed_table(&t, first).unwrap();
        let second = write(&registry, &t, &[value("b", 2.0, 2)]);
        registry.register_sealed_table(&t, second).unwrap();

        // a compaction of the first two starts from this snapshot
        let snapshot = registry.current_generation(&t).unwrap();
        let merged = write(&registry, &t, &[value("a", 1.0, 1), value("b", 2.0, 2)]);

        // a flush lands before the compaction publishes
        let flushed = write(&registry, &t, &[value("c", 3.0, 3)]);
        registry.register_sealed_table(&t, flushed).unwrap();

        let generation = registry
            .replace_tables(&t, &snapshot.sequence_numbers(), merged)
            .unwrap();
        let mut expected = vec![merged, flushed];
        expected.sort_unstable();
        assert_eq!(generation.sequence_numbers(), expected);
        for key in ["a", "b", "c"] {
            assert!(generation.get(key).unwrap().is_some(), "{}", key);
        }

        drop(snapshot);
        assert!(!sstable_file(dir.path(), &t, first).exists());
        assert!(!sstable_file(dir.path(), &t, second).exists());
        assert!(sstable_file(dir.path(), &t, flushed).exists());
    }

    #[test]
    fn test_replace_tables_rejects_retired_inputs() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");

        let first = write(&registry, &t, &[value("a", 1.0, 1)]);
        registry.register_sealed_table(&t, first).unwrap();
        let merged = write(&registry, &t, &[value("a", 1.0, 1)]);
        registry.replace_tables(&t, &[first], merged).unwrap();

        // the same input cannot be compacted twice
        let again = write(&registry, &t, &[value("a", 1.0, 1)]);
        let err = registry.replace_tables(&t, &[first], again).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert_eq!(
            registry.current_generation(&t).unwrap().sequence_numbers(),
            vec![merged]
        );

        let err = registry
            .replace_tables(&table("unknown"), &[1], 2)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound);
    }

    #[test]
    fn test_restart_scans_directories() {
        let dir = tempdir().unwrap();
        let t = table("points");
        {
            let registry = registry(&[dir.path()]);
            let first = write(&registry, &t, &[value("a", 1.0, 1)]);
            let second = write(&registry, &t, &[value("b", 2.0, 2)]);
            registry.publish_generation(&t, &[first, second], &[]).unwrap();
        }

        // leftovers of an interrupted writer
        fs::write(table_dir(dir.path(), &t).join("sstable_points_7.sst.tmp"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("not a table")).unwrap();

        let registry = registry(&[dir.path()]);
        assert_eq!(registry.all_tables(), vec![t.clone()]);
        let generation = registry.current_generation(&t).unwrap();
        assert_eq!(generation.sequence_numbers(), vec![1, 2]);
        assert_eq!(generation.get("a").unwrap().unwrap().timestamp(), 1);
        assert_eq!(registry.next_sequence_number(&t), 3);
        assert!(!table_dir(dir.path(), &t).join("sstable_points_7.sst.tmp").exists());
    }

    #[test]
    fn test_delete_table() {
        let dir = tempdir().unwrap();
        let registry = registry(&[dir.path()]);
        let t = table("points");
        let first = write(&registry, &t, &[value("a", 1.0, 1)]);
        registry.register_sealed_table(&t, first).unwrap();

        assert!(registry.delete_table(&t));
        assert!(registry.current_generation(&t).is_none());
        assert!(registry.all_tables().is_empty());
        assert!(!table_dir(dir.path(), &t).exists());
        assert!(!registry.delete_table(&t));
    }
}
