//! # bboxkv - Storage Engine for a Spatial Key-Value Store
//!
//! This crate provides the local storage layer of a spatial key-value store:
//! immutable sorted tables, a k-way compactor reconciling versions and
//! tombstones, and an R-tree spatial index answering bounding-box queries.
//!
//! ## Features
//!
//! - **Sorted Tables**: Immutable files of length-prefixed records sorted by key
//! - **Key Index**: Binary search over record offsets for point lookups
//! - **R-Tree Index**: Quadratic-split R-tree over the records' bounding boxes
//! - **Compaction**: K-way merge keeping only the newest version of each key
//! - **Atomic Swaps**: Readers see either the old or the new generation, never a mix
//! - **Deferred Deletion**: Retired files disappear once the last reader is gone
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bboxkv::config::StorageConfig;
//! use bboxkv::registry::StorageRegistry;
//! use bboxkv::sstable::TableName;
//! use bboxkv::{BoundingBox, Tuple};
//!
//! # fn main() -> Result<(), bboxkv::errors::StorageError> {
//! let registry = StorageRegistry::new(
//!     StorageConfig::new().with_storage_directory("/var/lib/bboxkv"),
//! )?;
//! let table = TableName::new("points")?;
//!
//! // Write and publish one generation
//! let mut writer = registry.create_writer(&table)?;
//! writer.open()?;
//! writer.add_record(&Tuple::new("berlin", BoundingBox::point(&[52.5, 13.4]), b"..".to_vec(), 1))?;
//! writer.add_record(&Tuple::new("paris", BoundingBox::point(&[48.9, 2.4]), b"..".to_vec(), 2))?;
//! writer.close()?;
//! let generation = registry.register_sealed_table(&table, writer.sequence_number())?;
//!
//! // Query it
//! let europe = BoundingBox::new(&[(45.0, 55.0), (0.0, 15.0)])?;
//! assert_eq!(generation.query_bounding_box(&europe)?.len(), 2);
//! assert!(generation.get("berlin")?.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Compaction
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bboxkv::compact::{CompactionRequest, CompactionService};
//! # use bboxkv::config::StorageConfig;
//! # use bboxkv::registry::StorageRegistry;
//! # use bboxkv::sstable::TableName;
//!
//! # fn main() -> Result<(), bboxkv::errors::StorageError> {
//! # let registry = Arc::new(StorageRegistry::new(StorageConfig::new().with_storage_directory("/tmp/x"))?);
//! let mut service = CompactionService::start(registry.clone())?;
//! let outcome = service.submit(CompactionRequest::major(TableName::new("points")?))?;
//! let result = outcome.recv().expect("worker alive")?;
//! println!("read {} tuples, wrote {}", result.read_tuples, result.written_tuples);
//! service.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod compact;
pub mod config;
pub mod entity;
pub mod errors;
pub mod registry;
pub mod spatial;
pub mod sstable;

pub use entity::{BoundingBox, Tuple};
pub use errors::{ErrorKind, StorageError, StorageResult};
