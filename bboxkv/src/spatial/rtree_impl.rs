use std::io::Write;

use crate::entity::BoundingBox;

use super::quadratic_split::quadratic_split;
use super::rtree_constants::{DEFAULT_NODE_SIZE, MIN_NODE_SIZE};
use super::rtree_types::{Node, NodeId, NodeKind, RTreeStats, SpatialError, SpatialResult};
use super::spatial_index_builder::SpatialIndexBuilder;
use super::spatial_index_entry::SpatialIndexEntry;

/// In-memory R-tree built while a table generation is written.
///
/// Nodes live in an arena addressed by [`NodeId`]. A split keeps the id of
/// the overflowing node for the first half and allocates a new node for the
/// second half, so the arena never contains detached nodes.
///
/// # Examples
///
/// ```rust
/// use bboxkv::BoundingBox;
/// use bboxkv::spatial::{RTreeSpatialIndex, SpatialIndexBuilder, SpatialIndexEntry};
///
/// let mut tree = RTreeSpatialIndex::with_max_node_size(4).unwrap();
/// for i in 0..20u64 {
///     let point = BoundingBox::point(&[i as f64, i as f64]);
///     assert!(tree.insert(SpatialIndexEntry::new(point, i)));
/// }
///
/// let query = BoundingBox::new(&[(0.0, 4.5), (0.0, 4.5)]).unwrap();
/// assert_eq!(tree.entries_intersecting(&query).len(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct RTreeSpatialIndex {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) max_node_size: usize,
    pub(crate) len: usize,
    pub(crate) dimension: Option<usize>,
}

impl Default for RTreeSpatialIndex {
    fn default() -> Self {
        Self::empty(DEFAULT_NODE_SIZE)
    }
}

impl RTreeSpatialIndex {
    /// Creates an empty tree with [`DEFAULT_NODE_SIZE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree holding at most `max_node_size` entries or
    /// children per node.
    pub fn with_max_node_size(max_node_size: usize) -> SpatialResult<Self> {
        if max_node_size < MIN_NODE_SIZE {
            return Err(SpatialError::InvalidOperation(format!(
                "Max node size must be at least {}, got {}",
                MIN_NODE_SIZE, max_node_size
            )));
        }
        Ok(Self::empty(max_node_size))
    }

    fn empty(max_node_size: usize) -> Self {
        Self {
            nodes: vec![Node::leaf(None, Vec::new())],
            root: 0,
            max_node_size,
            len: 0,
            dimension: None,
        }
    }

    pub fn max_node_size(&self) -> usize {
        self.max_node_size
    }

    /// Dimension of the indexed boxes, `None` while the tree is empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Covering box of all entries.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.node(self.root).bounding_box
    }

    pub fn stats(&self) -> RTreeStats {
        let leaf_nodes = self.nodes.iter().filter(|node| node.is_leaf()).count();

        let mut height = 1;
        let mut current = self.root;
        while let Some(&child) = self.node(current).children().first() {
            height += 1;
            current = child;
        }

        RTreeStats {
            entries: self.len as u64,
            nodes: self.nodes.len() as u64,
            leaf_nodes: leaf_nodes as u64,
            height,
        }
    }

    /// All entries in depth-first order.
    pub fn entries(&self) -> Vec<SpatialIndexEntry> {
        self.collect_entries(|_| true)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    fn collect_entries<F>(&self, node_filter: F) -> Vec<SpatialIndexEntry>
    where
        F: Fn(&BoundingBox) -> bool,
    {
        let mut result = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !node_filter(&node.bounding_box) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(entries) => result.extend(
                    entries
                        .iter()
                        .filter(|entry| node_filter(entry.bounding_box()))
                        .cloned(),
                ),
                NodeKind::Directory(children) => stack.extend(children.iter().rev()),
            }
        }
        result
    }

    /// Descends from the root, at each level picking the child whose box
    /// needs the least enlargement, ties going to the smaller resulting box.
    fn choose_leaf(&self, bounding_box: &BoundingBox) -> Option<NodeId> {
        let mut current = self.root;
        loop {
            let children = match &self.node(current).kind {
                NodeKind::Leaf(_) => return Some(current),
                NodeKind::Directory(children) => children,
            };

            let mut best = None;
            let mut best_enlargement = f64::INFINITY;
            let mut best_volume = f64::INFINITY;
            for &child in children {
                let child_box = &self.node(child).bounding_box;
                let enlargement = child_box.enlargement(bounding_box);
                let volume = child_box.covering_box(bounding_box).volume();
                if best.is_none()
                    || enlargement < best_enlargement
                    || (enlargement == best_enlargement && volume < best_volume)
                {
                    best = Some(child);
                    best_enlargement = enlargement;
                    best_volume = volume;
                }
            }
            current = best?;
        }
    }

    /// Extends the boxes on the path from `from` to the root.
    fn extend_path(&mut self, from: NodeId, bounding_box: &BoundingBox) {
        let mut current = Some(from);
        while let Some(id) = current {
            let node = self.node_mut(id);
            node.bounding_box = node.bounding_box.covering_box(bounding_box);
            current = node.parent;
        }
    }

    /// Splits every overflowing node on the path from `from` to the root.
    fn adjust_tree(&mut self, from: NodeId) {
        let mut current = Some(from);
        while let Some(id) = current {
            if self.node(id).len() > self.max_node_size {
                self.split(id);
            }
            current = self.node(id).parent;
        }
    }

    fn split(&mut self, id: NodeId) {
        let parent = self.node(id).parent;
        let max_node_size = self.max_node_size;
        let kind = std::mem::replace(&mut self.node_mut(id).kind, NodeKind::Leaf(Vec::new()));

        let sibling = match kind {
            NodeKind::Leaf(entries) => {
                let (first, second) =
                    quadratic_split(entries, max_node_size, |entry| entry.bounding_box().clone());
                self.node_mut(id).kind = NodeKind::Leaf(first);
                self.push_node(Node::leaf(parent, second))
            }
            NodeKind::Directory(children) => {
                let (first, second) = quadratic_split(children, max_node_size, |&child| {
                    self.node(child).bounding_box.clone()
                });
                self.node_mut(id).kind = NodeKind::Directory(first);
                let sibling = self.push_node(Node::directory(parent, second));
                let moved: Vec<NodeId> = self.node(sibling).children().to_vec();
                for child in moved {
                    self.node_mut(child).parent = Some(sibling);
                }
                sibling
            }
        };

        self.recompute_bounding_box(id);
        self.recompute_bounding_box(sibling);

        match parent {
            None => {
                let new_root = self.push_node(Node::directory(None, vec![id, sibling]));
                self.node_mut(id).parent = Some(new_root);
                self.node_mut(sibling).parent = Some(new_root);
                self.recompute_bounding_box(new_root);
                self.root = new_root;
            }
            Some(parent) => {
                if let NodeKind::Directory(children) = &mut self.node_mut(parent).kind {
                    let position = children
                        .iter()
                        .position(|&child| child == id)
                        .map_or(children.len(), |position| position + 1);
                    children.insert(position, sibling);
                }
            }
        }
    }

    pub(crate) fn recompute_bounding_box(&mut self, id: NodeId) {
        let bounding_box = match &self.node(id).kind {
            NodeKind::Leaf(entries) => {
                BoundingBox::covering_box_of(entries.iter().map(|entry| entry.bounding_box()))
            }
            NodeKind::Directory(children) => BoundingBox::covering_box_of(
                children.iter().map(|&child| &self.node(child).bounding_box),
            ),
        };
        self.node_mut(id).bounding_box = bounding_box;
    }
}

impl SpatialIndexBuilder for RTreeSpatialIndex {
    fn insert(&mut self, entry: SpatialIndexEntry) -> bool {
        let entry_box = entry.bounding_box().clone();
        if entry_box.is_empty() {
            return false;
        }

        match self.dimension {
            Some(dimension) if dimension != entry_box.dimension() => {
                log::warn!(
                    "Not indexing {} with dimension {}, the index has dimension {}",
                    entry_box,
                    entry_box.dimension(),
                    dimension
                );
                return false;
            }
            Some(_) => {}
            None => self.dimension = Some(entry_box.dimension()),
        }

        let Some(leaf) = self.choose_leaf(&entry_box) else {
            log::error!("R-tree has a directory node without children, entry not indexed");
            return false;
        };

        if let NodeKind::Leaf(entries) = &mut self.node_mut(leaf).kind {
            entries.push(entry);
        }
        self.extend_path(leaf, &entry_box);
        self.len += 1;
        self.adjust_tree(leaf);
        true
    }

    fn entries_intersecting(&self, query: &BoundingBox) -> Vec<SpatialIndexEntry> {
        self.collect_entries(|bounding_box| bounding_box.intersects(query))
    }

    fn write_to(&self, writer: &mut dyn Write) -> SpatialResult<()> {
        self.write_tree(writer)
    }

    fn len(&self) -> usize {
        self.len
    }
}
