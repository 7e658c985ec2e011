use std::cmp::Ordering;

use super::bounding_box::BoundingBox;

/// A versioned key-value record with a spatial extent.
///
/// A tuple is either a *value* (key, box, payload) or a *tombstone* that
/// marks the deletion of its key. Both variants carry a key and a timestamp
/// and order identically, see [`Tuple::compare_versions`].
#[derive(Clone, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct Tuple {
    key: String,
    bounding_box: BoundingBox,
    payload: Vec<u8>,
    timestamp: u64,
    tombstone: bool,
}

impl Tuple {
    /// Creates a value.
    ///
    /// A value with the empty box must not carry the tombstone marker as
    /// payload, such a record would read back as a deletion. Writers reject it.
    pub fn new(key: impl Into<String>, bounding_box: BoundingBox, payload: Vec<u8>, timestamp: u64) -> Tuple {
        Tuple {
            key: key.into(),
            bounding_box,
            payload,
            timestamp,
            tombstone: false,
        }
    }

    /// Creates a deletion marker for `key`.
    pub fn tombstone(key: impl Into<String>, timestamp: u64) -> Tuple {
        Tuple {
            key: key.into(),
            bounding_box: BoundingBox::empty(),
            payload: Vec::new(),
            timestamp,
            tombstone: true,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Version ordering: keys ascending, then the newest timestamp first.
    ///
    /// For two versions of the same key the one that sorts first is the one
    /// that survives a merge.
    pub fn compare_versions(&self, other: &Tuple) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tombstone {
            write!(f, "Tombstone(key={}, timestamp={})", self.key, self.timestamp)
        } else {
            write!(
                f,
                "Tuple(key={}, box={}, payload={} bytes, timestamp={})",
                self.key,
                self.bounding_box,
                self.payload.len(),
                self.timestamp
            )
        }
    }
}
