//! Serialization and integrity checking of the R-tree.
//!
//! ## Serialized Layout
//!
//! ```text
//! "bboxkv-rtree" | max_node_size: u32 | root node slot
//! ```
//!
//! The tree is written depth-first in pre-order. A node slot is a single
//! `0` byte for an absent node, or:
//!
//! ```text
//! 1 | node_id: u32 | max_node_size entry slots | max_node_size child node slots
//! ```
//!
//! and an entry slot is `0`, or `1` followed by the encoded
//! [`SpatialIndexEntry`]. Integers are big-endian.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::rtree_constants::{MAGIC_CHILD_NODE_FOLLOWING, MAGIC_CHILD_NODE_NOT_EXISTING, MIN_NODE_SIZE};
use super::rtree_impl::RTreeSpatialIndex;
use super::rtree_types::{Node, NodeId, NodeKind, SpatialError, SpatialResult};
use super::spatial_index_entry::SpatialIndexEntry;
use crate::entity::BoundingBox;
use crate::sstable::sstable_constants::MAGIC_BYTES_SPATIAL_RTREE_INDEX;

// ============================================================================
// Integrity Checking
// ============================================================================

/// Result of an integrity check
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Number of nodes reachable from the root
    pub nodes_checked: u64,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl RTreeSpatialIndex {
    /// Verifies the structural invariants of the tree:
    /// - no node holds more than `max_node_size` items
    /// - no node besides the root is empty
    /// - every node box is exactly the union of its content
    /// - parent links match the directory structure
    /// - all leaves sit at the same depth
    /// - the entry count matches `len()`
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut leaf_depth = None;
        let mut entries = 0usize;
        let mut stack: Vec<(NodeId, Option<NodeId>, u32)> = vec![(self.root, None, 1)];

        while let Some((id, expected_parent, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id as usize) else {
                report.errors.push(format!("Node {} does not exist", id));
                continue;
            };
            report.nodes_checked += 1;

            if node.parent != expected_parent {
                report.errors.push(format!(
                    "Node {} has parent {:?}, expected {:?}",
                    id, node.parent, expected_parent
                ));
            }
            if node.len() > self.max_node_size {
                report.errors.push(format!(
                    "Node {} holds {} items, max is {}",
                    id,
                    node.len(),
                    self.max_node_size
                ));
            }
            if node.len() == 0 && id != self.root {
                report.errors.push(format!("Node {} is empty", id));
            }

            let expected_box = match &node.kind {
                NodeKind::Leaf(leaf_entries) => {
                    entries += leaf_entries.len();
                    match leaf_depth {
                        None => leaf_depth = Some(depth),
                        Some(expected) if expected != depth => report.errors.push(format!(
                            "Leaf {} at depth {}, other leaves at depth {}",
                            id, depth, expected
                        )),
                        Some(_) => {}
                    }
                    BoundingBox::covering_box_of(leaf_entries.iter().map(|e| e.bounding_box()))
                }
                NodeKind::Directory(children) => {
                    for &child in children {
                        stack.push((child, Some(id), depth + 1));
                    }
                    BoundingBox::covering_box_of(
                        children
                            .iter()
                            .filter_map(|&child| self.nodes.get(child as usize))
                            .map(|child| &child.bounding_box),
                    )
                }
            };
            if node.bounding_box != expected_box {
                report.errors.push(format!(
                    "Node {} has box {}, its content covers {}",
                    id, node.bounding_box, expected_box
                ));
            }
        }

        if entries != self.len {
            report.errors.push(format!(
                "Tree reports {} entries, found {}",
                self.len, entries
            ));
        }
        if report.nodes_checked != self.nodes.len() as u64 {
            report.errors.push(format!(
                "Reached {} of {} nodes from the root",
                report.nodes_checked,
                self.nodes.len()
            ));
        }

        report.is_valid = report.errors.is_empty();
        report
    }
}

// ============================================================================
// Serialization
// ============================================================================

impl RTreeSpatialIndex {
    pub(crate) fn write_tree<W: Write + ?Sized>(&self, writer: &mut W) -> SpatialResult<()> {
        let max_node_size = u32::try_from(self.max_node_size).map_err(|_| {
            SpatialError::Serialization(format!("Max node size {} too large", self.max_node_size))
        })?;
        writer.write_all(MAGIC_BYTES_SPATIAL_RTREE_INDEX)?;
        writer.write_all(&max_node_size.to_be_bytes())?;

        let mut stack: Vec<Option<NodeId>> = vec![Some(self.root)];
        while let Some(slot) = stack.pop() {
            let Some(id) = slot else {
                writer.write_all(&[MAGIC_CHILD_NODE_NOT_EXISTING])?;
                continue;
            };
            let node = self.node(id);
            writer.write_all(&[MAGIC_CHILD_NODE_FOLLOWING])?;
            writer.write_all(&id.to_be_bytes())?;

            let entries = node.entries();
            for position in 0..self.max_node_size {
                match entries.get(position) {
                    Some(entry) => {
                        writer.write_all(&[MAGIC_CHILD_NODE_FOLLOWING])?;
                        entry.write_to(writer)?;
                    }
                    None => writer.write_all(&[MAGIC_CHILD_NODE_NOT_EXISTING])?,
                }
            }

            let children = node.children();
            for position in (0..self.max_node_size).rev() {
                stack.push(children.get(position).copied());
            }
        }
        Ok(())
    }

    /// Writes the tree to a new file at `path`.
    pub fn write_to_file(&self, path: &Path) -> SpatialResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_tree(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        log::debug!("Wrote spatial index {:?} with {} entries", path, self.len);
        Ok(())
    }

    /// Reads a tree written by [`SpatialIndexBuilder::write_to`](super::SpatialIndexBuilder::write_to).
    ///
    /// Node ids, boxes and parent links are restored exactly.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> SpatialResult<RTreeSpatialIndex> {
        let mut magic = vec![0u8; MAGIC_BYTES_SPATIAL_RTREE_INDEX.len()];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC_BYTES_SPATIAL_RTREE_INDEX {
            return Err(SpatialError::Integrity(
                "Spatial index does not start with the magic bytes".into(),
            ));
        }

        let max_node_size = read_u32(reader)? as usize;
        if max_node_size < MIN_NODE_SIZE {
            return Err(SpatialError::Integrity(format!(
                "Invalid max node size {} in spatial index",
                max_node_size
            )));
        }

        let mut parsed: Vec<ParsedNode> = Vec::new();
        match read_marker(reader)? {
            MAGIC_CHILD_NODE_FOLLOWING => parsed.push(read_node_body(reader, None, max_node_size)?),
            _ => {
                return Err(SpatialError::Integrity(
                    "Spatial index has no root node".into(),
                ))
            }
        }

        // (node position, child slots still to read)
        let mut pending: Vec<(usize, usize)> = vec![(0, max_node_size)];
        while let Some(top) = pending.last_mut() {
            if top.1 == 0 {
                pending.pop();
                continue;
            }
            top.1 -= 1;
            let parent = top.0;

            if read_marker(reader)? == MAGIC_CHILD_NODE_FOLLOWING {
                let position = parsed.len();
                parsed.push(read_node_body(reader, Some(parent), max_node_size)?);
                parsed[parent].children.push(position);
                pending.push((position, max_node_size));
            }
        }

        build_tree(parsed, max_node_size)
    }

    /// Reads the tree stored in the file at `path`.
    pub fn read_from_file(path: &Path) -> SpatialResult<RTreeSpatialIndex> {
        let mut reader = BufReader::new(File::open(path)?);
        let tree = Self::read_from(&mut reader)?;
        log::debug!("Loaded spatial index {:?} with {} entries", path, tree.len);
        Ok(tree)
    }
}

/// A node as read from the stream, linked by stream position.
struct ParsedNode {
    id: NodeId,
    parent: Option<usize>,
    entries: Vec<SpatialIndexEntry>,
    children: Vec<usize>,
}

fn read_u32<R: Read + ?Sized>(reader: &mut R) -> SpatialResult<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

fn read_marker<R: Read + ?Sized>(reader: &mut R) -> SpatialResult<u8> {
    let mut marker = [0u8; 1];
    reader.read_exact(&mut marker)?;
    match marker[0] {
        MAGIC_CHILD_NODE_NOT_EXISTING | MAGIC_CHILD_NODE_FOLLOWING => Ok(marker[0]),
        other => Err(SpatialError::Serialization(format!(
            "Invalid slot marker {}",
            other
        ))),
    }
}

fn read_node_body<R: Read + ?Sized>(
    reader: &mut R,
    parent: Option<usize>,
    max_node_size: usize,
) -> SpatialResult<ParsedNode> {
    let id = read_u32(reader)?;
    let mut entries = Vec::new();
    for _ in 0..max_node_size {
        if read_marker(reader)? == MAGIC_CHILD_NODE_FOLLOWING {
            entries.push(SpatialIndexEntry::read_from(reader)?);
        }
    }
    Ok(ParsedNode {
        id,
        parent,
        entries,
        children: Vec::new(),
    })
}

fn build_tree(parsed: Vec<ParsedNode>, max_node_size: usize) -> SpatialResult<RTreeSpatialIndex> {
    let node_count = parsed.len();
    let mut seen = HashSet::with_capacity(node_count);
    for node in &parsed {
        if node.id as usize >= node_count || !seen.insert(node.id) {
            return Err(SpatialError::Integrity(format!(
                "Invalid node id {} in a tree of {} nodes",
                node.id, node_count
            )));
        }
        if !node.entries.is_empty() && !node.children.is_empty() {
            return Err(SpatialError::Integrity(format!(
                "Node {} holds both entries and children",
                node.id
            )));
        }
    }

    let ids: Vec<NodeId> = parsed.iter().map(|node| node.id).collect();
    let root = ids[0];
    let mut slots: Vec<Option<Node>> = vec![None; node_count];
    let mut len = 0;
    for node in parsed {
        let parent = node.parent.map(|position| ids[position]);
        let built = if node.children.is_empty() {
            len += node.entries.len();
            Node::leaf(parent, node.entries)
        } else {
            Node::directory(parent, node.children.iter().map(|&child| ids[child]).collect())
        };
        slots[node.id as usize] = Some(built);
    }

    let mut tree = RTreeSpatialIndex {
        nodes: slots.into_iter().flatten().collect(),
        root,
        max_node_size,
        len,
        dimension: None,
    };

    // children follow their parent in pre-order, so the reverse order
    // computes every child box before the box of its parent
    for &id in ids.iter().rev() {
        tree.recompute_bounding_box(id);
    }

    if !tree.bounding_box().is_empty() {
        tree.dimension = Some(tree.bounding_box().dimension());
    }
    Ok(tree)
}
