use smallvec::SmallVec;

use crate::errors::{ErrorKind, StorageError, StorageResult};

/// Size of one encoded coordinate in bytes.
const COORDINATE_BYTES: usize = 8;

/// An n-dimensional axis aligned bounding box.
///
/// The box is stored as a flat list of `min, max` pairs, one pair per
/// dimension. A box without any dimension is the *empty box*; it describes a
/// tuple without spatial extent, covers nothing and is the identity element
/// of [`BoundingBox::covering_box`].
///
/// # Examples
///
/// ```rust
/// use bboxkv::BoundingBox;
///
/// let region = BoundingBox::new(&[(0.0, 100.0), (0.0, 100.0)]).unwrap();
/// let point = BoundingBox::point(&[50.0, 50.0]);
///
/// assert!(region.contains(&point));
/// assert!(region.intersects(&point));
/// assert_eq!(region.volume(), 10_000.0);
/// ```
#[derive(Clone, PartialEq, Default, Debug, serde::Deserialize, serde::Serialize)]
pub struct BoundingBox {
    coordinates: SmallVec<[f64; 4]>,
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "BoundingBox(empty)");
        }
        write!(f, "BoundingBox(")?;
        for d in 0..self.dimension() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{}, {}]", self.low(d), self.high(d))?;
        }
        write!(f, ")")
    }
}

impl BoundingBox {
    /// Creates a box from `(min, max)` pairs, one per dimension.
    ///
    /// Fails with a validation error if a pair has `min > max` or a NaN bound.
    pub fn new(ranges: &[(f64, f64)]) -> StorageResult<BoundingBox> {
        let mut coordinates = SmallVec::with_capacity(ranges.len() * 2);
        for (d, &(min, max)) in ranges.iter().enumerate() {
            if min.is_nan() || max.is_nan() || min > max {
                return Err(StorageError::new(
                    &format!("Invalid range in dimension {}: [{}, {}]", d, min, max),
                    ErrorKind::ValidationError,
                ));
            }
            coordinates.push(min);
            coordinates.push(max);
        }
        Ok(BoundingBox { coordinates })
    }

    /// Creates a zero-volume box located at `point`.
    pub fn point(point: &[f64]) -> BoundingBox {
        let mut coordinates = SmallVec::with_capacity(point.len() * 2);
        for &value in point {
            coordinates.push(value);
            coordinates.push(value);
        }
        BoundingBox { coordinates }
    }

    /// The empty box, used for tuples without spatial extent.
    pub fn empty() -> BoundingBox {
        BoundingBox::default()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.coordinates.len() / 2
    }

    /// Lower bound of dimension `d`.
    pub fn low(&self, d: usize) -> f64 {
        self.coordinates[2 * d]
    }

    /// Upper bound of dimension `d`.
    pub fn high(&self, d: usize) -> f64 {
        self.coordinates[2 * d + 1]
    }

    pub fn extent(&self, d: usize) -> f64 {
        self.high(d) - self.low(d)
    }

    /// Product of all extents. The empty box has volume zero.
    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (0..self.dimension()).map(|d| self.extent(d)).product()
    }

    /// Returns true if `other` lies completely inside this box.
    ///
    /// Every box contains the empty box; boxes of different dimension never
    /// contain each other.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.dimension() != other.dimension() {
            return false;
        }
        (0..self.dimension())
            .all(|d| self.low(d) <= other.low(d) && self.high(d) >= other.high(d))
    }

    /// Returns true if both boxes share at least one point (borders included).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        if self.is_empty() || other.is_empty() || self.dimension() != other.dimension() {
            return false;
        }
        (0..self.dimension())
            .all(|d| self.low(d) <= other.high(d) && self.high(d) >= other.low(d))
    }

    /// Smallest box covering both boxes. The empty box is the neutral element.
    ///
    /// Covering boxes of different dimension is a caller bug; the box with the
    /// higher dimension wins in that case.
    pub fn covering_box(&self, other: &BoundingBox) -> BoundingBox {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        if self.dimension() != other.dimension() {
            return if self.dimension() > other.dimension() {
                self.clone()
            } else {
                other.clone()
            };
        }
        let mut coordinates = SmallVec::with_capacity(self.coordinates.len());
        for d in 0..self.dimension() {
            coordinates.push(self.low(d).min(other.low(d)));
            coordinates.push(self.high(d).max(other.high(d)));
        }
        BoundingBox { coordinates }
    }

    /// Covering box of all given boxes, or the empty box for no input.
    pub fn covering_box_of<'a, I>(boxes: I) -> BoundingBox
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        boxes
            .into_iter()
            .fold(BoundingBox::empty(), |acc, b| acc.covering_box(b))
    }

    /// Volume increase needed to extend this box so it also covers `other`.
    pub fn enlargement(&self, other: &BoundingBox) -> f64 {
        self.covering_box(other).volume() - self.volume()
    }

    /// Encodes the box as big-endian doubles in `min0, max0, min1, max1, ...` order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.coordinates.len() * COORDINATE_BYTES);
        for value in &self.coordinates {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes
    }

    /// Decodes a box written by [`BoundingBox::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<BoundingBox> {
        if bytes.len() % (2 * COORDINATE_BYTES) != 0 {
            return Err(StorageError::new(
                &format!("Bounding box length {} is not a multiple of 16", bytes.len()),
                ErrorKind::EncodingError,
            ));
        }
        let coordinates = bytes
            .chunks_exact(COORDINATE_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; COORDINATE_BYTES];
                raw.copy_from_slice(chunk);
                f64::from_be_bytes(raw)
            })
            .collect();
        Ok(BoundingBox { coordinates })
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        self.coordinates.len() * COORDINATE_BYTES
    }
}
