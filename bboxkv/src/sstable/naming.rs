//! File naming for table generations.
//!
//! Every generation of a table lives in `<storage dir>/<table name>/` and is
//! made of files sharing the base name `sstable_<table name>_<sequence>`:
//!
//! ```text
//! /data/points/sstable_points_4.sst    data file
//! /data/points/sstable_points_4.idx    key index
//! /data/points/sstable_points_4.sidx   spatial index
//! /data/points/sstable_points_4.meta   metadata
//! /data/points/sstable_points_4.bloom  key bloom filter
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::sstable_constants::{
    SST_BLOOM_SUFFIX, SST_FILE_PREFIX, SST_FILE_SUFFIX, SST_INDEX_SUFFIX, SST_META_SUFFIX,
    SST_SPATIAL_INDEX_SUFFIX,
};
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// The validated name of a table.
///
/// Names are restricted to ASCII letters, digits, `-` and `_` so they can be
/// used as directory names and embedded in file names unambiguously.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: &str) -> StorageResult<TableName> {
        if name.is_empty() {
            return Err(StorageError::new(
                "Table name must not be empty",
                ErrorKind::ValidationError,
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StorageError::new(
                &format!("Invalid table name: {}", name),
                ErrorKind::ValidationError,
            ));
        }
        Ok(TableName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory holding all generations of `table`, e.g. `/data/points`.
pub fn table_dir(directory: &Path, table: &TableName) -> PathBuf {
    directory.join(table.as_str())
}

/// Common file name stem of one generation, e.g. `sstable_points_4`.
pub fn sstable_base_name(table: &TableName, sequence_number: u64) -> String {
    format!("{}{}_{}", SST_FILE_PREFIX, table, sequence_number)
}

fn generation_file(directory: &Path, table: &TableName, sequence_number: u64, suffix: &str) -> PathBuf {
    table_dir(directory, table).join(format!(
        "{}{}",
        sstable_base_name(table, sequence_number),
        suffix
    ))
}

pub fn sstable_file(directory: &Path, table: &TableName, sequence_number: u64) -> PathBuf {
    generation_file(directory, table, sequence_number, SST_FILE_SUFFIX)
}

pub fn key_index_file(directory: &Path, table: &TableName, sequence_number: u64) -> PathBuf {
    generation_file(directory, table, sequence_number, SST_INDEX_SUFFIX)
}

pub fn spatial_index_file(directory: &Path, table: &TableName, sequence_number: u64) -> PathBuf {
    generation_file(directory, table, sequence_number, SST_SPATIAL_INDEX_SUFFIX)
}

pub fn metadata_file(directory: &Path, table: &TableName, sequence_number: u64) -> PathBuf {
    generation_file(directory, table, sequence_number, SST_META_SUFFIX)
}

pub fn bloom_filter_file(directory: &Path, table: &TableName, sequence_number: u64) -> PathBuf {
    generation_file(directory, table, sequence_number, SST_BLOOM_SUFFIX)
}

/// All files that make up one generation, data file first.
pub fn generation_files(directory: &Path, table: &TableName, sequence_number: u64) -> Vec<PathBuf> {
    vec![
        sstable_file(directory, table, sequence_number),
        key_index_file(directory, table, sequence_number),
        spatial_index_file(directory, table, sequence_number),
        metadata_file(directory, table, sequence_number),
        bloom_filter_file(directory, table, sequence_number),
    ]
}

/// Extracts the sequence number from a generation file name.
///
/// The name must match `sstable_<table>_<integer><suffix>` with one of the
/// known generation suffixes, anything else is a parse error.
pub fn extract_sequence_number(table: &TableName, file_name: &str) -> StorageResult<u64> {
    let parse_error = || {
        StorageError::new(
            &format!("Unable to parse sequence number: {}", file_name),
            ErrorKind::ParseError,
        )
    };

    let prefix = format!("{}{}_", SST_FILE_PREFIX, table);
    let rest = file_name.strip_prefix(&prefix).ok_or_else(parse_error)?;

    let digits = [
        SST_FILE_SUFFIX,
        SST_INDEX_SUFFIX,
        SST_SPATIAL_INDEX_SUFFIX,
        SST_META_SUFFIX,
        SST_BLOOM_SUFFIX,
    ]
    .iter()
    .find_map(|suffix| rest.strip_suffix(suffix))
    .ok_or_else(parse_error)?;

    // "007" would not name the same file as sequence 7
    if digits.is_empty()
        || !digits.chars().all(|c| c.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return Err(parse_error());
    }

    digits
        .parse::<u64>()
        .map_err(|e| StorageError::new_with_cause(&parse_error().to_string(), ErrorKind::ParseError, e.into()))
}

/// Lists the sequence numbers of all data files of `table`, ascending.
///
/// Files that do not belong to the table are ignored; data files with an
/// unparsable name are skipped with a warning.
pub fn list_sequence_numbers(directory: &Path, table: &TableName) -> StorageResult<Vec<u64>> {
    let dir = table_dir(directory, table);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut sequences = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.ends_with(SST_FILE_SUFFIX) {
            continue;
        }
        match extract_sequence_number(table, file_name) {
            Ok(sequence) => sequences.push(sequence),
            Err(err) => log::warn!("Skipping file {:?}: {}", entry.path(), err),
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}
