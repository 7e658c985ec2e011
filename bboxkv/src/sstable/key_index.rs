//! Key index for sealed tables.
//!
//! ## Index File Layout
//!
//! ```text
//! +------------------+---------------+---------------+-----+
//! | "bboxkv-idx"     | offset_0: u32 | offset_1: u32 | ... |
//! +------------------+---------------+---------------+-----+
//! ```
//!
//! Offset `i` is the position of the `i`-th record of the data file. Records
//! are sorted by key, so a lookup is a binary search over the offsets that
//! decodes one record per probe.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::reader::{validate_magic, SSTableIterator, SSTableReader};
use super::sstable_constants::{
    INDEX_ENTRY_BYTES, MAGIC_BYTES_INDEX, SST_FILE_SUFFIX, SST_INDEX_SUFFIX,
};
use crate::entity::Tuple;
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// A table reader combined with the key index of its generation.
///
/// If the generation has no key index file, lookups fall back to the
/// sequential [`SSTableReader::scan_for_key`].
pub struct SSTableKeyIndexReader {
    reader: SSTableReader,
    offsets: Option<Vec<u64>>,
}

impl SSTableKeyIndexReader {
    /// Wraps `reader` and loads the key index stored next to its data file.
    pub fn open(reader: SSTableReader) -> StorageResult<Self> {
        let index_path = index_path_for(reader.path());
        if !index_path.exists() {
            log::debug!("No key index for {:?}, using sequential scans", reader.path());
            return Ok(Self {
                reader,
                offsets: None,
            });
        }

        let offsets = read_offsets(&index_path)?;
        log::debug!("Loaded key index {:?} with {} entries", index_path, offsets.len());
        Ok(Self {
            reader,
            offsets: Some(offsets),
        })
    }

    pub fn reader(&self) -> &SSTableReader {
        &self.reader
    }

    pub fn into_reader(self) -> SSTableReader {
        self.reader
    }

    pub fn is_indexed(&self) -> bool {
        self.offsets.is_some()
    }

    /// Number of records, known only when the key index is present.
    pub fn len(&self) -> Option<usize> {
        self.offsets.as_ref().map(Vec::len)
    }

    /// Offset of the `position`-th record.
    pub fn offset_of(&self, position: usize) -> Option<u64> {
        self.offsets
            .as_ref()
            .and_then(|offsets| offsets.get(position).copied())
    }

    /// Point lookup for `key`.
    pub fn get(&self, key: &str) -> StorageResult<Option<Tuple>> {
        let Some(offsets) = &self.offsets else {
            return self.reader.scan_for_key(key);
        };

        let mut low = 0usize;
        let mut high = offsets.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let tuple = self.reader.read_at(offsets[mid])?;
            match tuple.key().cmp(key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Some(tuple)),
            }
        }
        Ok(None)
    }

    /// Key of the first record, if the table is not empty.
    pub fn first_key(&self) -> StorageResult<Option<String>> {
        match self.offsets.as_ref().map(|offsets| offsets.first().copied()) {
            Some(Some(offset)) => Ok(Some(self.reader.read_at(offset)?.key().to_string())),
            Some(None) => Ok(None),
            None => match self.reader.iter()?.next() {
                Some(tuple) => Ok(Some(tuple?.key().to_string())),
                None => Ok(None),
            },
        }
    }

    /// Key of the last record, if the table is not empty.
    pub fn last_key(&self) -> StorageResult<Option<String>> {
        match self.offsets.as_ref().map(|offsets| offsets.last().copied()) {
            Some(Some(offset)) => Ok(Some(self.reader.read_at(offset)?.key().to_string())),
            Some(None) => Ok(None),
            None => {
                let mut last = None;
                for tuple in self.reader.iter()? {
                    last = Some(tuple?.key().to_string());
                }
                Ok(last)
            }
        }
    }

    /// Lazy iterator over all records in key order.
    pub fn iter(&self) -> StorageResult<SSTableIterator> {
        self.reader.iter()
    }
}

/// Path of the key index belonging to the data file at `data_path`.
pub fn index_path_for(data_path: &Path) -> PathBuf {
    let file_name = data_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let base = file_name.strip_suffix(SST_FILE_SUFFIX).unwrap_or(file_name);
    data_path.with_file_name(format!("{}{}", base, SST_INDEX_SUFFIX))
}

fn read_offsets(index_path: &Path) -> StorageResult<Vec<u64>> {
    let mut file = File::open(index_path)?;
    validate_magic(&mut file, MAGIC_BYTES_INDEX, index_path)?;

    let body_len = file.metadata()?.len() as usize - MAGIC_BYTES_INDEX.len();
    if body_len % INDEX_ENTRY_BYTES != 0 {
        return Err(StorageError::new(
            &format!("Key index {:?} has a truncated entry", index_path),
            ErrorKind::IntegrityError,
        ));
    }

    let mut body = Vec::with_capacity(body_len);
    BufReader::new(file).read_to_end(&mut body)?;

    Ok(body
        .chunks_exact(INDEX_ENTRY_BYTES)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as u64)
        .collect())
}
