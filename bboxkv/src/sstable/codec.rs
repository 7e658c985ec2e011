//! Record codec for sealed table files.
//!
//! ## Record Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! +--------------+--------------+------------------+---------------+-----+-----+---------+
//! |key_len: u16  |box_len: u32  |payload_len: u32  |timestamp: u64 | key | box | payload |
//! +--------------+--------------+------------------+---------------+-----+-----+---------+
//! ```
//!
//! A tombstone is stored with the empty box and the tombstone marker as payload.

use std::io::{self, Read, Write};

use super::sstable_constants::{RECORD_HEADER_BYTES, TOMBSTONE_MARKER};
use crate::entity::{BoundingBox, Tuple};
use crate::errors::{ErrorKind, StorageError, StorageResult};

/// Encodes `tuple` into a freshly allocated record.
pub fn encode(tuple: &Tuple) -> StorageResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(encoded_len(tuple));
    encode_into(&mut buffer, tuple)?;
    Ok(buffer)
}

/// Size of the record produced for `tuple`.
pub fn encoded_len(tuple: &Tuple) -> usize {
    let payload_len = if tuple.is_tombstone() {
        TOMBSTONE_MARKER.len()
    } else {
        tuple.payload().len()
    };
    RECORD_HEADER_BYTES + tuple.key().len() + tuple.bounding_box().encoded_len() + payload_len
}

/// Writes the record for `tuple` and returns the number of bytes written.
///
/// A value with the empty box and the tombstone marker as payload cannot be
/// told apart from a tombstone and is rejected with `ValidationError`.
pub fn encode_into<W: Write>(writer: &mut W, tuple: &Tuple) -> StorageResult<usize> {
    let key_bytes = tuple.key().as_bytes();
    let box_bytes = tuple.bounding_box().to_bytes();
    let payload: &[u8] = if tuple.is_tombstone() {
        TOMBSTONE_MARKER
    } else {
        tuple.payload()
    };
    if !tuple.is_tombstone() && tuple.bounding_box().is_empty() && payload == TOMBSTONE_MARKER {
        return Err(StorageError::new(
            &format!("Value of key {} would be read back as a tombstone", tuple.key()),
            ErrorKind::ValidationError,
        ));
    }

    let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
        StorageError::new(
            &format!("Key too long: {} bytes (max {})", key_bytes.len(), u16::MAX),
            ErrorKind::ValidationError,
        )
    })?;
    let box_len = length_u32(box_bytes.len(), "bounding box")?;
    let payload_len = length_u32(payload.len(), "payload")?;

    let mut header = [0u8; RECORD_HEADER_BYTES];
    header[0..2].copy_from_slice(&key_len.to_be_bytes());
    header[2..6].copy_from_slice(&box_len.to_be_bytes());
    header[6..10].copy_from_slice(&payload_len.to_be_bytes());
    header[10..18].copy_from_slice(&tuple.timestamp().to_be_bytes());

    writer.write_all(&header)?;
    writer.write_all(key_bytes)?;
    writer.write_all(&box_bytes)?;
    writer.write_all(payload)?;

    Ok(RECORD_HEADER_BYTES + key_bytes.len() + box_bytes.len() + payload.len())
}

fn length_u32(len: usize, field: &str) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| {
        StorageError::new(
            &format!("The {} is too large: {} bytes", field, len),
            ErrorKind::ValidationError,
        )
    })
}

/// Decodes exactly one record. A stream ending before the record is complete
/// is an IO error.
pub fn decode<R: Read>(reader: &mut R) -> StorageResult<Tuple> {
    match decode_or_eof(reader)? {
        Some(tuple) => Ok(tuple),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "No record available at the current position",
        )
        .into()),
    }
}

/// Decodes one record, or returns `None` if the stream ends cleanly before it.
pub fn decode_or_eof<R: Read>(reader: &mut R) -> StorageResult<Option<Tuple>> {
    let mut header = [0u8; RECORD_HEADER_BYTES];
    if !read_header(reader, &mut header)? {
        return Ok(None);
    }

    let key_len = u16::from_be_bytes([header[0], header[1]]) as usize;
    let box_len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let payload_len = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let mut timestamp_bytes = [0u8; 8];
    timestamp_bytes.copy_from_slice(&header[10..18]);
    let timestamp = u64::from_be_bytes(timestamp_bytes);

    let key_bytes = read_field(reader, key_len)?;
    let box_bytes = read_field(reader, box_len)?;
    let payload = read_field(reader, payload_len)?;

    let key = String::from_utf8(key_bytes)?;
    let bounding_box = BoundingBox::from_bytes(&box_bytes)?;

    if bounding_box.is_empty() && payload == TOMBSTONE_MARKER {
        return Ok(Some(Tuple::tombstone(key, timestamp)));
    }
    Ok(Some(Tuple::new(key, bounding_box, payload, timestamp)))
}

/// Fills `header`; returns false when the stream is exhausted before the first byte.
fn read_header<R: Read>(reader: &mut R, header: &mut [u8]) -> StorageResult<bool> {
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("Truncated record header ({} of {} bytes)", filled, header.len()),
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Reads a field of `len` bytes. The buffer grows with the bytes actually
/// read, so a corrupt length cannot force a large allocation.
fn read_field<R: Read>(reader: &mut R, len: usize) -> StorageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.take(len as u64).read_to_end(&mut buffer)?;
    if buffer.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Truncated record field ({} of {} bytes)", buffer.len(), len),
        )
        .into());
    }
    Ok(buffer)
}
