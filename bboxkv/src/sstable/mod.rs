//! Sealed sorted tables.
//!
//! A table generation is an immutable file of records sorted by key, plus
//! optional side files: a key index, a key bloom filter, a spatial index
//! and a metadata summary.
//! See [`codec`] for the record layout and [`naming`] for the file names.

pub mod bloom_filter;
pub mod codec;
pub mod key_index;
pub mod metadata;
pub mod naming;
pub mod reader;
pub mod sstable_constants;
pub mod writer;

pub use bloom_filter::KeyFilter;
pub use key_index::SSTableKeyIndexReader;
pub use metadata::SSTableMetadata;
pub use naming::TableName;
pub use reader::{SSTableIterator, SSTableReader};
pub use writer::SSTableWriter;
