//! Reader for sealed table files.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::codec;
use super::naming::{extract_sequence_number, TableName};
use super::sstable_constants::MAGIC_BYTES;
use crate::entity::Tuple;
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// Offset of the first record in every table file.
pub const FIRST_RECORD_OFFSET: u64 = MAGIC_BYTES.len() as u64;

/// Read access to one sealed table file.
///
/// The file is validated once on [`SSTableReader::open`]. Every scan or
/// positioned read then works on its own file handle, so a reader can be
/// shared between threads and serve concurrent lookups. After
/// [`SSTableReader::close`] every access, including iterators that are still
/// in flight, fails with an IO error.
pub struct SSTableReader {
    table_name: TableName,
    path: PathBuf,
    sequence_number: u64,
    size: u64,
    closed: Arc<AtomicBool>,
}

impl SSTableReader {
    /// Opens the table file at `path` and validates its signature.
    ///
    /// # Errors
    ///
    /// * `ParseError` if the file name does not encode a sequence number of `table_name`
    /// * `FileNotFound` / `IOError` if the file cannot be read
    /// * `IntegrityError` if the magic bytes are missing or do not match
    pub fn open(table_name: &TableName, path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StorageError::new(
                    &format!("Invalid table file path: {:?}", path),
                    ErrorKind::ParseError,
                )
            })?;
        let sequence_number = extract_sequence_number(table_name, file_name)?;

        let mut file = File::open(path).map_err(|e| {
            log::error!("Unable to open table file {:?}: {}", path, e);
            StorageError::from(e)
        })?;
        validate_magic(&mut file, MAGIC_BYTES, path)?;
        let size = file.metadata()?.len();

        log::debug!("Opened table {} generation {} at {:?}", table_name, sequence_number, path);

        Ok(Self {
            table_name: table_name.clone(),
            path: path.to_path_buf(),
            sequence_number,
            size,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of this generation, taken from the file name.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Size of the table file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Scans the table from the first record for `key`.
    ///
    /// Records are sorted by key, so the scan stops as soon as it passes the
    /// position where `key` would have to be.
    pub fn scan_for_key(&self, key: &str) -> StorageResult<Option<Tuple>> {
        log::debug!("Scanning table {} generation {} for {}", self.table_name, self.sequence_number, key);

        let mut reader = self.positioned_reader(FIRST_RECORD_OFFSET)?;
        while let Some(tuple) = codec::decode_or_eof(&mut reader)? {
            match tuple.key().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(tuple)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Decodes the single record starting at `offset`.
    pub fn read_at(&self, offset: u64) -> StorageResult<Tuple> {
        if offset < FIRST_RECORD_OFFSET || offset >= self.size {
            return Err(StorageError::new(
                &format!(
                    "Offset {} is outside the records of {:?} (size {})",
                    offset, self.path, self.size
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        let mut reader = self.positioned_reader(offset)?;
        codec::decode(&mut reader)
    }

    /// Lazy iterator over all records in key order.
    pub fn iter(&self) -> StorageResult<SSTableIterator> {
        let reader = self.positioned_reader(FIRST_RECORD_OFFSET)?;
        Ok(SSTableIterator {
            reader,
            position: FIRST_RECORD_OFFSET,
            closed: Arc::clone(&self.closed),
            done: false,
        })
    }

    /// Closes the reader. Later accesses fail with an IO error.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("Closed reader for {:?}", self.path);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(closed_error(&self.path))
        } else {
            Ok(())
        }
    }

    fn positioned_reader(&self, offset: u64) -> StorageResult<BufReader<File>> {
        self.check_closed()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(BufReader::new(file))
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("table_name", &self.table_name)
            .field("sequence_number", &self.sequence_number)
            .field("path", &self.path)
            .finish()
    }
}

fn closed_error(path: &Path) -> StorageError {
    StorageError::new(
        &format!("Reader for {:?} is closed", path),
        ErrorKind::IOError,
    )
}

/// Reads and compares the leading signature of `file`.
pub(crate) fn validate_magic(file: &mut File, magic: &[u8], path: &Path) -> StorageResult<()> {
    let mut signature = vec![0u8; magic.len()];
    let mut filled = 0;
    while filled < signature.len() {
        let n = file.read(&mut signature[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled < magic.len() || signature != magic {
        return Err(StorageError::new(
            &format!("File {:?} does not contain the magic bytes", path),
            ErrorKind::IntegrityError,
        ));
    }
    Ok(())
}

/// Single-pass iterator over the records of one table.
///
/// The iterator yields `Err` at most once; after an error or the end of the
/// file it only returns `None`.
pub struct SSTableIterator {
    reader: BufReader<File>,
    position: u64,
    closed: Arc<AtomicBool>,
    done: bool,
}

impl SSTableIterator {
    /// File offset of the next record to be returned.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Iterator for SSTableIterator {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.closed.load(Ordering::Acquire) {
            self.done = true;
            return Some(Err(StorageError::new(
                "Table reader was closed during iteration",
                ErrorKind::IOError,
            )));
        }
        match codec::decode_or_eof(&mut self.reader) {
            Ok(Some(tuple)) => {
                self.position += codec::encoded_len(&tuple) as u64;
                Some(Ok(tuple))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
