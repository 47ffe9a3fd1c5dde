//! In-memory node model.

use super::rtree_types::{Pool, RTreeBounds, RTreeEntry};

/// A decoded R-Tree node.
///
/// Leaf nodes hold row entries, internal nodes hold references to child
/// nodes. A node may briefly hold `max_node_capacity + 1` entries between an
/// overflowing append and the split that follows it; it is never written to
/// its slot in that state.
#[derive(Debug, Clone, PartialEq)]
pub struct RTreeNode {
    pub is_leaf: bool,
    pub entries: Vec<RTreeEntry>,
}

impl RTreeNode {
    pub fn new(is_leaf: bool) -> Self {
        Self {
            is_leaf,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(is_leaf: bool, entries: Vec<RTreeEntry>) -> Self {
        Self { is_leaf, entries }
    }

    /// Tight union of the entries' bounds
    pub fn bounds(&self) -> RTreeBounds {
        let mut bounds = RTreeBounds::empty();
        for entry in &self.entries {
            bounds.extend(&entry.bounds);
        }
        bounds
    }

    pub fn pool(&self) -> Pool {
        if self.is_leaf {
            Pool::Leaf
        } else {
            Pool::Internal
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
