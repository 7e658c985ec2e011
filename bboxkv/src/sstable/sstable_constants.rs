//! Constants for the sorted table file formats.

/// Signature at the start of every sealed table file.
pub const MAGIC_BYTES: &[u8] = b"bboxkv-sst";

/// Signature at the start of every key index file.
pub const MAGIC_BYTES_INDEX: &[u8] = b"bboxkv-idx";

/// Signature at the start of every serialized R-tree spatial index.
pub const MAGIC_BYTES_SPATIAL_RTREE_INDEX: &[u8] = b"bboxkv-rtree";

/// Signature at the start of every table metadata file.
pub const MAGIC_BYTES_METADATA: &[u8] = b"bboxkv-meta";

/// Signature at the start of every key bloom filter file.
pub const MAGIC_BYTES_BLOOM: &[u8] = b"bboxkv-bloom";

/// Payload written for a tombstone record. Tombstones also carry the empty box.
pub const TOMBSTONE_MARKER: &[u8] = b"__bboxkv_deleted__";

/// File name prefix of all table generation files.
pub const SST_FILE_PREFIX: &str = "sstable_";

/// Suffix of the data file.
pub const SST_FILE_SUFFIX: &str = ".sst";

/// Suffix of the key index file.
pub const SST_INDEX_SUFFIX: &str = ".idx";

/// Suffix of the spatial index file.
pub const SST_SPATIAL_INDEX_SUFFIX: &str = ".sidx";

/// Suffix of the metadata file.
pub const SST_META_SUFFIX: &str = ".meta";

/// Suffix of the key bloom filter file.
pub const SST_BLOOM_SUFFIX: &str = ".bloom";

/// False positive rate the key bloom filters are sized for.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Suffix appended to files while they are being written.
pub const TMP_FILE_SUFFIX: &str = ".tmp";

/// Fixed size of a record header: key length, box length, payload length, timestamp.
pub const RECORD_HEADER_BYTES: usize = 2 + 4 + 4 + 8;

/// Size of one key index entry.
pub const INDEX_ENTRY_BYTES: usize = 4;
