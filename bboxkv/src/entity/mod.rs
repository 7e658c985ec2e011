//! Leaf entities shared by every storage component.

mod bounding_box;
mod tuple;

pub use bounding_box::BoundingBox;
pub use tuple::Tuple;
