//! Key bloom filter written next to each generation.
//!
//! Point lookups consult the filter before searching the key index, so a
//! generation that cannot hold a key costs no file access.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use bloomfilter::Bloom;

use super::sstable_constants::{BLOOM_FALSE_POSITIVE_RATE, MAGIC_BYTES_BLOOM};
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// Set of the keys stored in one generation, with false positives.
pub struct KeyFilter {
    bloom: Bloom<str>,
}

impl KeyFilter {
    /// Builds a filter holding `keys`.
    pub fn build<'a, I>(keys: I, expected_keys: usize) -> StorageResult<KeyFilter>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bloom: Bloom<str> =
            Bloom::new_for_fp_rate(expected_keys.max(1), BLOOM_FALSE_POSITIVE_RATE)
                .map_err(|e| StorageError::new(e, ErrorKind::ValidationError))?;
        for key in keys {
            bloom.set(key);
        }
        Ok(KeyFilter { bloom })
    }

    /// False means `key` is definitely not stored in the generation.
    pub fn might_contain(&self, key: &str) -> bool {
        self.bloom.check(key)
    }

    pub fn write_to(&self, path: &Path) -> StorageResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC_BYTES_BLOOM)?;
        writer.write_all(self.bloom.as_slice())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> StorageResult<KeyFilter> {
        let bytes = fs::read(path)?;
        let body = bytes.strip_prefix(MAGIC_BYTES_BLOOM).ok_or_else(|| {
            StorageError::new(
                &format!("File {:?} does not contain the magic bytes", path),
                ErrorKind::IntegrityError,
            )
        })?;
        let bloom = Bloom::from_slice(body).map_err(|e| {
            StorageError::new(
                &format!("Corrupt bloom filter {:?}: {}", path, e),
                ErrorKind::IntegrityError,
            )
        })?;
        Ok(KeyFilter { bloom })
    }
}
