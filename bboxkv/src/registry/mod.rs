//! Table locations and visible generations.

mod storage_registry;
mod table_generation;

pub use storage_registry::StorageRegistry;
pub use table_generation::{SealedTable, TableGeneration};
