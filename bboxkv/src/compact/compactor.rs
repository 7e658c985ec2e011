//! K-way merge of sealed tables.
//!
//! Every input is consumed through one lazy cursor. In each step the cursor
//! heads with the smallest key are consumed together and only the newest
//! version of that key survives. A major compaction additionally drops
//! surviving tombstones, since no older generation can hold a version they
//! would have to mask.

use std::iter::Peekable;
use std::path::PathBuf;

use crate::entity::Tuple;
use crate::errors::{ErrorKind, StorageError, StorageResult};
use crate::sstable::{SSTableIterator, SSTableKeyIndexReader, SSTableWriter};

/// Outcome of [`SSTableCompactor::execute`].
///
/// The counters are also reported for failed runs and then cover the part of
/// the merge that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Records consumed from all inputs
    pub read_tuples: u64,
    /// Records written to the output
    pub written_tuples: u64,
    pub success: bool,
    /// Data file of the sealed output, set on success
    pub output_file: Option<PathBuf>,
}

/// Merges several sealed tables of one table into a new generation.
pub struct SSTableCompactor {
    inputs: Vec<SSTableKeyIndexReader>,
    writer: SSTableWriter,
    major_compaction: bool,
    read_tuples: u64,
    written_tuples: u64,
}

type Cursor = Peekable<SSTableIterator>;

impl SSTableCompactor {
    /// `writer` must not be opened yet; the compactor opens and closes it.
    pub fn new(inputs: Vec<SSTableKeyIndexReader>, writer: SSTableWriter) -> Self {
        SSTableCompactor {
            inputs,
            writer,
            major_compaction: false,
            read_tuples: 0,
            written_tuples: 0,
        }
    }

    /// A major compaction merges every live table and removes tombstones.
    pub fn with_major_compaction(mut self, major_compaction: bool) -> Self {
        self.major_compaction = major_compaction;
        self
    }

    pub fn is_major_compaction(&self) -> bool {
        self.major_compaction
    }

    /// Runs the merge. Errors are logged and reported through
    /// `success == false`; the output is discarded in that case and the
    /// inputs are never modified.
    pub fn execute(mut self) -> CompactionResult {
        let kind = if self.major_compaction { "major" } else { "minor" };
        log::info!(
            "Starting {} compaction of {} tables into {:?}",
            kind,
            self.inputs.len(),
            self.writer.data_file()
        );

        match self.merge() {
            Ok(output_file) => {
                log::info!(
                    "Finished {} compaction into {:?}: read {} tuples, wrote {} tuples",
                    kind,
                    output_file,
                    self.read_tuples,
                    self.written_tuples
                );
                CompactionResult {
                    read_tuples: self.read_tuples,
                    written_tuples: self.written_tuples,
                    success: true,
                    output_file: Some(output_file),
                }
            }
            Err(e) => {
                log::error!(
                    "Error in {} compaction into {:?} after reading {} tuples: {}",
                    kind,
                    self.writer.data_file(),
                    self.read_tuples,
                    e
                );
                self.writer.abort();
                CompactionResult {
                    read_tuples: self.read_tuples,
                    written_tuples: self.written_tuples,
                    success: false,
                    output_file: None,
                }
            }
        }
    }

    fn merge(&mut self) -> StorageResult<PathBuf> {
        self.writer.open()?;

        let mut cursors = self
            .inputs
            .iter()
            .map(|input| input.iter().map(Iterator::peekable))
            .collect::<StorageResult<Vec<Cursor>>>()?;

        while let Some(key) = lowest_key(&mut cursors)? {
            let newest = consume_key(&mut cursors, &key, &mut self.read_tuples)?;
            if self.major_compaction && newest.is_tombstone() {
                continue;
            }
            self.writer.add_record(&newest)?;
            self.written_tuples += 1;
        }

        self.writer.close()
    }
}

/// Smallest key among all cursor heads, `None` once every cursor is exhausted.
fn lowest_key(cursors: &mut [Cursor]) -> StorageResult<Option<String>> {
    let mut lowest: Option<String> = None;
    for cursor in cursors.iter_mut() {
        match cursor.peek() {
            Some(Ok(tuple)) => {
                if lowest.as_deref().map_or(true, |key| tuple.key() < key) {
                    lowest = Some(tuple.key().to_string());
                }
            }
            Some(Err(_)) => return Err(take_error(cursor)),
            None => {}
        }
    }
    Ok(lowest)
}

/// Consumes the head of every cursor positioned at `key` and returns the
/// newest version. For equal timestamps the cursor with the highest index
/// wins.
fn consume_key(cursors: &mut [Cursor], key: &str, read_tuples: &mut u64) -> StorageResult<Tuple> {
    let mut newest: Option<Tuple> = None;
    for cursor in cursors.iter_mut() {
        let at_key = matches!(cursor.peek(), Some(Ok(tuple)) if tuple.key() == key);
        if !at_key {
            continue;
        }
        if let Some(Ok(tuple)) = cursor.next() {
            *read_tuples += 1;
            newest = match newest {
                Some(current) if current.timestamp() > tuple.timestamp() => Some(current),
                _ => Some(tuple),
            };
        }
    }

    newest.ok_or_else(|| {
        StorageError::new(
            &format!("No cursor is positioned at key {}", key),
            ErrorKind::InternalError,
        )
    })
}

fn take_error(cursor: &mut Cursor) -> StorageError {
    match cursor.next() {
        Some(Err(e)) => e,
        _ => StorageError::new("Cursor error vanished", ErrorKind::InternalError),
    }
}
