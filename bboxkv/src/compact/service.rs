//! Background compaction.
//!
//! A fixed pool of worker threads takes compaction requests from a
//! `crossbeam_channel`, merges the requested generations of a table and
//! publishes the result through the [`StorageRegistry`]. Compactions of the
//! same table are serialized; different tables are compacted in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::compactor::{CompactionResult, SSTableCompactor};
use crate::errors::{ErrorKind, StorageError, StorageResult};
use crate::registry::StorageRegistry;
use crate::sstable::naming::{generation_files, sstable_file, TableName};
use crate::sstable::{SSTableKeyIndexReader, SSTableReader, SSTableWriter};

/// What to compact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionRequest {
    table_name: TableName,
    sequence_numbers: Option<Vec<u64>>,
    major: bool,
}

impl CompactionRequest {
    /// Merges every live generation of `table_name` and drops tombstones.
    pub fn major(table_name: TableName) -> Self {
        CompactionRequest {
            table_name,
            sequence_numbers: None,
            major: true,
        }
    }

    /// Merges the given generations and keeps tombstones.
    pub fn minor(table_name: TableName, sequence_numbers: Vec<u64>) -> Self {
        CompactionRequest {
            table_name,
            sequence_numbers: Some(sequence_numbers),
            major: false,
        }
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    pub fn is_major(&self) -> bool {
        self.major
    }
}

struct CompactionJob {
    request: CompactionRequest,
    reply: Sender<StorageResult<CompactionResult>>,
}

type TableLocks = Arc<Mutex<HashMap<TableName, Arc<Mutex<()>>>>>;

/// Worker pool running compactions.
pub struct CompactionService {
    sender: Option<Sender<CompactionJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompactionService {
    /// Starts `config.compaction_workers()` worker threads.
    pub fn start(registry: Arc<StorageRegistry>) -> StorageResult<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<CompactionJob>();
        let table_locks: TableLocks = Arc::new(Mutex::new(HashMap::new()));
        let worker_count = registry.config().compaction_workers();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let receiver = receiver.clone();
            let registry = registry.clone();
            let table_locks = table_locks.clone();
            let handle = std::thread::Builder::new()
                .name(format!("bboxkv-compaction-{}", id))
                .spawn(move || run_worker(receiver, registry, table_locks))?;
            workers.push(handle);
        }

        log::info!("Started compaction service with {} workers", worker_count);
        Ok(CompactionService {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues `request`. The returned channel receives the outcome once a
    /// worker has processed it.
    pub fn submit(
        &self,
        request: CompactionRequest,
    ) -> StorageResult<Receiver<StorageResult<CompactionResult>>> {
        let sender = self.sender.as_ref().ok_or_else(shut_down_error)?;
        let (reply, outcome) = crossbeam_channel::bounded(1);
        sender
            .send(CompactionJob { request, reply })
            .map_err(|_| shut_down_error())?;
        Ok(outcome)
    }

    /// Stops accepting requests, finishes the queued ones and joins the workers.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Compaction worker panicked");
            }
        }
        log::info!("Compaction service stopped");
    }
}

impl Drop for CompactionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shut_down_error() -> StorageError {
    StorageError::new(
        "Compaction service is shut down",
        ErrorKind::InvalidOperation,
    )
}

fn run_worker(
    receiver: Receiver<CompactionJob>,
    registry: Arc<StorageRegistry>,
    table_locks: TableLocks,
) {
    for job in receiver.iter() {
        let table_lock = table_locks
            .lock()
            .entry(job.request.table_name.clone())
            .or_default()
            .clone();
        let outcome = {
            let _guard = table_lock.lock();
            compact_table(&registry, &job.request)
        };
        if let Err(e) = &outcome {
            log::error!("Compaction of table {} failed: {}", job.request.table_name, e);
        }
        // the submitter may have stopped waiting
        let _ = job.reply.send(outcome);
    }
}

/// Runs one compaction on the calling thread and publishes its output.
///
/// Returns the compactor's result; a failed merge is reported with
/// `success == false` and leaves the visible generation unchanged.
pub fn compact_table(
    registry: &StorageRegistry,
    request: &CompactionRequest,
) -> StorageResult<CompactionResult> {
    let table = &request.table_name;
    let generation = registry.current_generation(table).ok_or_else(|| {
        StorageError::new(
            &format!("Table {} has no sealed generation", table),
            ErrorKind::NotFound,
        )
    })?;
    let live = generation.sequence_numbers();

    let inputs = match &request.sequence_numbers {
        None => live.clone(),
        Some(requested) => {
            if let Some(sequence) = requested.iter().find(|s| !live.contains(s)) {
                return Err(StorageError::new(
                    &format!("Generation {} of table {} is not live", sequence, table),
                    ErrorKind::InvalidOperation,
                ));
            }
            let mut requested = requested.clone();
            requested.sort_unstable();
            requested.dedup();
            requested
        }
    };
    if request.major && inputs.len() != live.len() {
        return Err(StorageError::new(
            "A major compaction must include every live generation",
            ErrorKind::InvalidOperation,
        ));
    }

    let directory = generation.directory();
    let readers = inputs
        .iter()
        .map(|&sequence| {
            let reader = SSTableReader::open(table, sstable_file(directory, table, sequence))?;
            SSTableKeyIndexReader::open(reader)
        })
        .collect::<StorageResult<Vec<_>>>()?;

    let output = registry.next_sequence_number(table);
    let writer = SSTableWriter::from_config(registry.config(), directory, table, output);
    let result = SSTableCompactor::new(readers, writer)
        .with_major_compaction(request.major)
        .execute();
    if !result.success {
        return Ok(result);
    }

    // tables flushed while the merge ran are kept by the swap
    if let Err(e) = registry.replace_tables(table, &inputs, output) {
        for path in generation_files(directory, table, output) {
            if path.exists() {
                if let Err(remove_error) = std::fs::remove_file(&path) {
                    log::error!("Unable to remove unpublished file {:?}: {}", path, remove_error);
                }
            }
        }
        return Err(e);
    }
    Ok(result)
}
