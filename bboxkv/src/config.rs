use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, StorageError, StorageResult};
use crate::spatial::rtree_constants::{DEFAULT_NODE_SIZE, MIN_NODE_SIZE};

/// Storage engine configuration.
///
/// Create via `StorageConfig::new()`, then configure via the builder methods
/// before handing it to the [`StorageRegistry`](crate::registry::StorageRegistry).
/// The struct derives `serde` so a host application can load it from any
/// format it likes; missing fields take their default.
///
/// Defaults:
/// - no storage directory (at least one is required)
/// - R-tree nodes of 64 entries
/// - compaction workers: half of the available CPU cores, at least one
/// - key index, key bloom filter and spatial index are written for every
///   generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    storage_directories: Vec<PathBuf>,
    rtree_max_node_size: usize,
    compaction_workers: usize,
    build_spatial_index: bool,
    write_key_index: bool,
    write_bloom_filter: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        StorageConfig {
            storage_directories: Vec::new(),
            rtree_max_node_size: DEFAULT_NODE_SIZE,
            compaction_workers: (cpus / 2).max(1),
            build_spatial_index: true,
            write_key_index: true,
            write_bloom_filter: true,
        }
    }
}

impl StorageConfig {
    #[inline]
    pub fn new() -> StorageConfig {
        StorageConfig::default()
    }

    /// Adds a directory tables can be placed in.
    pub fn with_storage_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.storage_directories.push(directory.as_ref().to_path_buf());
        self
    }

    pub fn with_rtree_max_node_size(mut self, max_node_size: usize) -> Self {
        self.rtree_max_node_size = max_node_size;
        self
    }

    pub fn with_compaction_workers(mut self, workers: usize) -> Self {
        self.compaction_workers = workers;
        self
    }

    pub fn with_spatial_index(mut self, enabled: bool) -> Self {
        self.build_spatial_index = enabled;
        self
    }

    pub fn with_key_index(mut self, enabled: bool) -> Self {
        self.write_key_index = enabled;
        self
    }

    pub fn with_bloom_filter(mut self, enabled: bool) -> Self {
        self.write_bloom_filter = enabled;
        self
    }

    #[inline]
    pub fn storage_directories(&self) -> &[PathBuf] {
        &self.storage_directories
    }

    #[inline]
    pub fn rtree_max_node_size(&self) -> usize {
        self.rtree_max_node_size
    }

    #[inline]
    pub fn compaction_workers(&self) -> usize {
        self.compaction_workers
    }

    #[inline]
    pub fn build_spatial_index(&self) -> bool {
        self.build_spatial_index
    }

    #[inline]
    pub fn write_key_index(&self) -> bool {
        self.write_key_index
    }

    #[inline]
    pub fn write_bloom_filter(&self) -> bool {
        self.write_bloom_filter
    }

    /// Checks the configuration before the engine starts.
    pub fn validate(&self) -> StorageResult<()> {
        if self.storage_directories.is_empty() {
            return Err(StorageError::new(
                "At least one storage directory is required",
                ErrorKind::ValidationError,
            ));
        }
        if self.rtree_max_node_size < MIN_NODE_SIZE {
            return Err(StorageError::new(
                &format!(
                    "R-tree max node size must be at least {}, got {}",
                    MIN_NODE_SIZE, self.rtree_max_node_size
                ),
                ErrorKind::ValidationError,
            ));
        }
        if self.compaction_workers == 0 {
            return Err(StorageError::new(
                "At least one compaction worker is required",
                ErrorKind::ValidationError,
            ));
        }
        Ok(())
    }
}
