use std::io::{Read, Write};

use crate::entity::BoundingBox;

use super::rtree_types::{SpatialError, SpatialResult};

/// A bounding box paired with the position of its record in the data file.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialIndexEntry {
    bounding_box: BoundingBox,
    reference: u64,
}

impl SpatialIndexEntry {
    pub fn new(bounding_box: BoundingBox, reference: u64) -> Self {
        Self {
            bounding_box,
            reference,
        }
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// Offset of the record in the data file
    pub fn reference(&self) -> u64 {
        self.reference
    }

    /// Writes `box_len: u32 | box bytes | reference: u64`, big-endian.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> SpatialResult<()> {
        let box_bytes = self.bounding_box.to_bytes();
        let box_len = u32::try_from(box_bytes.len()).map_err(|_| {
            SpatialError::Serialization(format!(
                "Bounding box too large: {} bytes",
                box_bytes.len()
            ))
        })?;
        writer.write_all(&box_len.to_be_bytes())?;
        writer.write_all(&box_bytes)?;
        writer.write_all(&self.reference.to_be_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> SpatialResult<Self> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let mut box_bytes = vec![0u8; u32::from_be_bytes(len_bytes) as usize];
        reader.read_exact(&mut box_bytes)?;
        let bounding_box = BoundingBox::from_bytes(&box_bytes)?;

        let mut reference_bytes = [0u8; 8];
        reader.read_exact(&mut reference_bytes)?;
        Ok(Self {
            bounding_box,
            reference: u64::from_be_bytes(reference_bytes),
        })
    }
}
