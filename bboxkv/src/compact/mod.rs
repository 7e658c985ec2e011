//! Compaction of sealed tables.

pub mod compactor;
pub mod service;

pub use compactor::{CompactionResult, SSTableCompactor};
pub use service::{compact_table, CompactionRequest, CompactionService};
