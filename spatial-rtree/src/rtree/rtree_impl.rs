//! R-Tree implementation over slot pools.

use std::sync::atomic::{AtomicU64, Ordering};

use super::allocator::{FixedSizeAllocator, SlotAllocator};
use super::node::RTreeNode;
use super::persistence::{decode_node, encode_node};
use super::rtree_config::RTreeConfig;
use super::rtree_types::{
    NodeRef, Pointer, Pool, RTreeBounds, RTreeEntry, RTreeStats, RowId, SpatialError,
    SpatialResult,
};

/// Disk-resident R-Tree.
///
/// Nodes live in two slot pools, one for leaves and one for internal nodes,
/// and reference each other by slot. The root entry is kept outside the
/// pools together with the tight bounds of the whole tree.
///
/// Mutations take `&mut self`; reads take `&self`, so any number of scans may
/// run while no mutation is in progress.
pub struct RTree<A: SlotAllocator = FixedSizeAllocator> {
    config: RTreeConfig,
    root: RTreeEntry,
    leaf_allocator: A,
    node_allocator: A,
    node_reads: AtomicU64,
}

/// Result of removing a row below one node
enum Removal {
    NotFound,
    /// Row removed, node kept with these bounds
    Shrunk(RTreeBounds),
    /// Row removed, node underflowed and was detached
    Orphaned,
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

impl RTree<FixedSizeAllocator> {
    /// Create an empty tree whose pools pack slots into blocks of
    /// `max_payload` usable bytes.
    pub fn with_payload(config: RTreeConfig, max_payload: usize) -> SpatialResult<Self> {
        config.validate_layout(max_payload)?;
        let leaf_allocator =
            FixedSizeAllocator::new(Pool::Leaf, config.leaf_byte_size(), max_payload)?;
        let node_allocator =
            FixedSizeAllocator::new(Pool::Internal, config.node_byte_size(), max_payload)?;
        Self::new(config, leaf_allocator, node_allocator)
    }
}

impl<A: SlotAllocator> RTree<A> {
    /// Create an empty tree over the given pools.
    ///
    /// The pools' slot sizes must match the node layout of `config`.
    pub fn new(config: RTreeConfig, leaf_allocator: A, node_allocator: A) -> SpatialResult<Self> {
        if leaf_allocator.slot_size() != config.leaf_byte_size()
            || node_allocator.slot_size() != config.node_byte_size()
        {
            return Err(SpatialError::InvalidConfig(format!(
                "Pool slot sizes ({} / {}) do not match the node layout ({} / {})",
                leaf_allocator.slot_size(),
                node_allocator.slot_size(),
                config.leaf_byte_size(),
                config.node_byte_size()
            )));
        }

        Ok(Self {
            config,
            root: RTreeEntry::default(),
            leaf_allocator,
            node_allocator,
            node_reads: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RTreeConfig {
        &self.config
    }

    /// Root pointer and the bounds of the whole tree
    pub fn root(&self) -> &RTreeEntry {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.pointer.is_null()
    }

    /// Point the tree at an existing root node, recomputing the root bounds
    pub fn set_root(&mut self, pointer: Pointer) -> SpatialResult<()> {
        let bounds = match pointer {
            Pointer::Null => RTreeBounds::empty(),
            Pointer::Node(node_ref) => self.read_node(node_ref)?.bounds(),
            Pointer::RowId(_) => {
                return Err(SpatialError::Corrupted(
                    "Root pointer must reference a node".into(),
                ))
            }
        };
        self.root = RTreeEntry::new(pointer, bounds);
        Ok(())
    }

    pub fn leaf_allocator(&self) -> &A {
        &self.leaf_allocator
    }

    pub fn leaf_allocator_mut(&mut self) -> &mut A {
        &mut self.leaf_allocator
    }

    pub fn node_allocator(&self) -> &A {
        &self.node_allocator
    }

    pub fn node_allocator_mut(&mut self) -> &mut A {
        &mut self.node_allocator
    }

    /// Memory held by both pools
    pub fn in_memory_size(&self) -> usize {
        self.leaf_allocator.in_memory_size() + self.node_allocator.in_memory_size()
    }

    /// Number of node reads served so far
    pub fn node_reads(&self) -> u64 {
        self.node_reads.load(Ordering::Relaxed)
    }

    /// Drop every node and make the tree empty
    pub fn reset(&mut self) {
        self.leaf_allocator.reset();
        self.node_allocator.reset();
        self.root = RTreeEntry::default();
    }

    // ========================================================================
    // Node access
    // ========================================================================

    fn allocator(&self, pool: Pool) -> &A {
        match pool {
            Pool::Leaf => &self.leaf_allocator,
            Pool::Internal => &self.node_allocator,
        }
    }

    fn allocator_mut(&mut self, pool: Pool) -> &mut A {
        match pool {
            Pool::Leaf => &mut self.leaf_allocator,
            Pool::Internal => &mut self.node_allocator,
        }
    }

    /// Decode the node stored in a slot
    pub fn read_node(&self, node_ref: NodeRef) -> SpatialResult<RTreeNode> {
        let bytes = self.allocator(node_ref.pool).read(node_ref.slot)?;
        self.node_reads.fetch_add(1, Ordering::Relaxed);
        decode_node(bytes, node_ref.pool == Pool::Leaf, &self.config)
    }

    fn write_node(&mut self, node_ref: NodeRef, node: &RTreeNode) -> SpatialResult<()> {
        let bytes = encode_node(node, &self.config)?;
        self.allocator_mut(node_ref.pool).write(node_ref.slot, &bytes)
    }

    fn allocate_node(&mut self, node: &RTreeNode) -> SpatialResult<NodeRef> {
        let pool = node.pool();
        let slot = self.allocator_mut(pool).allocate()?;
        let node_ref = NodeRef { pool, slot };
        self.write_node(node_ref, node)?;
        Ok(node_ref)
    }

    fn free_node(&mut self, node_ref: NodeRef) -> SpatialResult<()> {
        self.allocator_mut(node_ref.pool).free(node_ref.slot)
    }

    fn root_ref(&self) -> SpatialResult<Option<NodeRef>> {
        match self.root.pointer {
            Pointer::Null => Ok(None),
            Pointer::Node(node_ref) => Ok(Some(node_ref)),
            Pointer::RowId(_) => Err(SpatialError::Corrupted(
                "Root pointer references a row".into(),
            )),
        }
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert a row entry.
    ///
    /// Descends by least enlargement, splits overflowing nodes on the way back
    /// up and grows a new root when the old one splits.
    pub fn insert(&mut self, entry: RTreeEntry) -> SpatialResult<()> {
        if !entry.pointer.is_row_id() {
            return Err(SpatialError::InvalidOperation(
                "Only row entries can be inserted".into(),
            ));
        }
        if !entry.bounds.is_valid() {
            return Err(SpatialError::InvalidOperation(format!(
                "Cannot insert an entry with empty or NaN bounds {:?}",
                entry.bounds
            )));
        }
        self.insert_row(entry)
    }

    fn insert_row(&mut self, entry: RTreeEntry) -> SpatialResult<()> {
        let root_ref = match self.root_ref()? {
            Some(root_ref) => root_ref,
            None => {
                let leaf = RTreeNode::with_entries(true, vec![entry]);
                let root_ref = self.allocate_node(&leaf)?;
                self.root = RTreeEntry::new(Pointer::Node(root_ref), entry.bounds);
                return Ok(());
            }
        };

        // (node slot, node, index of the child descended into)
        let mut path: Vec<(NodeRef, RTreeNode, usize)> = Vec::new();
        let mut current = root_ref;
        let mut node = self.read_node(current)?;
        while !node.is_leaf {
            let index = choose_subtree(&node, &entry.bounds).ok_or_else(|| {
                SpatialError::Corrupted("Internal node without children".into())
            })?;
            let child = child_ref(&node.entries[index])?;
            let child_node = self.read_node(child)?;
            path.push((current, node, index));
            current = child;
            node = child_node;
        }

        node.entries.push(entry);
        let mut sibling = self.store_or_split(current, &mut node)?;
        let mut bounds = node.bounds();

        while let Some((parent_ref, mut parent, index)) = path.pop() {
            parent.entries[index].bounds = bounds;
            if let Some(sibling) = sibling.take() {
                parent.entries.push(sibling);
            }
            sibling = self.store_or_split(parent_ref, &mut parent)?;
            bounds = parent.bounds();
        }

        match sibling {
            Some(sibling) => {
                let old_root = RTreeEntry::new(Pointer::Node(root_ref), bounds);
                let new_root = RTreeNode::with_entries(false, vec![old_root, sibling]);
                let new_root_ref = self.allocate_node(&new_root)?;
                self.root = RTreeEntry::new(Pointer::Node(new_root_ref), new_root.bounds());
                log::debug!("RTree root split, new root at {:?}", new_root_ref);
            }
            None => self.root.bounds = bounds,
        }

        Ok(())
    }

    /// Write a node back to its slot, splitting it first when it overflows.
    /// Returns the entry of the split-off sibling.
    fn store_or_split(
        &mut self,
        node_ref: NodeRef,
        node: &mut RTreeNode,
    ) -> SpatialResult<Option<RTreeEntry>> {
        if node.len() <= self.config.max_node_capacity() {
            self.write_node(node_ref, node)?;
            return Ok(None);
        }

        let entries = std::mem::take(&mut node.entries);
        let (retained, moved) = split_entries(entries, self.config.min_split_size());
        node.entries = retained;
        let sibling = RTreeNode::with_entries(node.is_leaf, moved);

        self.write_node(node_ref, node)?;
        let sibling_ref = self.allocate_node(&sibling)?;
        log::trace!(
            "Split {} node {} into {} + {} entries",
            node_ref.pool,
            node_ref.slot,
            node.len(),
            sibling.len()
        );

        Ok(Some(RTreeEntry::new(
            Pointer::Node(sibling_ref),
            sibling.bounds(),
        )))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove the row referenced by `entry`.
    ///
    /// Every subtree whose bounds intersect the entry's bounds is probed until
    /// a leaf holding the row id is found. Returns `false` if the row is not
    /// in the tree.
    pub fn delete(&mut self, entry: &RTreeEntry) -> SpatialResult<bool> {
        let row_id = entry.pointer.row_id().ok_or_else(|| {
            SpatialError::InvalidOperation("Only row entries can be deleted".into())
        })?;
        let root_ref = match self.root_ref()? {
            Some(root_ref) => root_ref,
            None => return Ok(false),
        };
        if !self.root.bounds.intersects(&entry.bounds) {
            return Ok(false);
        }

        let mut orphans = Vec::new();
        match self.delete_from(root_ref, row_id, &entry.bounds, &mut orphans, true)? {
            Removal::NotFound => return Ok(false),
            Removal::Shrunk(bounds) => self.root.bounds = bounds,
            Removal::Orphaned => {
                return Err(SpatialError::Corrupted("Root node was detached".into()))
            }
        }

        self.condense_root()?;
        if !orphans.is_empty() {
            log::trace!("Reinserting {} orphaned rows", orphans.len());
        }
        for orphan in orphans {
            self.insert_row(orphan)?;
        }
        Ok(true)
    }

    fn delete_from(
        &mut self,
        node_ref: NodeRef,
        row_id: RowId,
        bounds: &RTreeBounds,
        orphans: &mut Vec<RTreeEntry>,
        is_root: bool,
    ) -> SpatialResult<Removal> {
        let mut node = self.read_node(node_ref)?;

        let removed = if node.is_leaf {
            match node
                .entries
                .iter()
                .position(|e| e.pointer == Pointer::RowId(row_id))
            {
                Some(index) => {
                    node.entries.remove(index);
                    true
                }
                None => false,
            }
        } else {
            let mut removed = false;
            for index in 0..node.entries.len() {
                let child = node.entries[index];
                if !child.bounds.intersects(bounds) {
                    continue;
                }
                match self.delete_from(child_ref(&child)?, row_id, bounds, orphans, false)? {
                    Removal::NotFound => continue,
                    Removal::Shrunk(child_bounds) => node.entries[index].bounds = child_bounds,
                    Removal::Orphaned => {
                        node.entries.remove(index);
                    }
                }
                removed = true;
                break;
            }
            removed
        };

        if !removed {
            return Ok(Removal::NotFound);
        }

        if !is_root && (node.is_empty() || node.len() < self.config.min_node_capacity()) {
            self.detach_subtree(node_ref, node, orphans)?;
            return Ok(Removal::Orphaned);
        }

        self.write_node(node_ref, &node)?;
        Ok(Removal::Shrunk(node.bounds()))
    }

    /// Free a subtree's slots and stage its rows for reinsertion
    fn detach_subtree(
        &mut self,
        node_ref: NodeRef,
        node: RTreeNode,
        orphans: &mut Vec<RTreeEntry>,
    ) -> SpatialResult<()> {
        let mut pending = vec![(node_ref, node)];
        while let Some((node_ref, node)) = pending.pop() {
            self.free_node(node_ref)?;
            if node.is_leaf {
                orphans.extend(node.entries);
            } else {
                for child in &node.entries {
                    let child = child_ref(child)?;
                    pending.push((child, self.read_node(child)?));
                }
            }
        }
        Ok(())
    }

    /// Drop an empty root and promote single children
    fn condense_root(&mut self) -> SpatialResult<()> {
        while let Some(root_ref) = self.root_ref()? {
            let root = self.read_node(root_ref)?;
            if root.is_empty() {
                self.free_node(root_ref)?;
                self.root = RTreeEntry::default();
                log::debug!("RTree is now empty");
                return Ok(());
            }
            if root.is_leaf || root.len() > 1 {
                self.root.bounds = root.bounds();
                return Ok(());
            }

            self.free_node(root_ref)?;
            self.root = root.entries[0];
            log::debug!("RTree root shrunk to {:?}", self.root.pointer);
        }
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Walk the whole tree and report its shape
    pub fn stats(&self) -> SpatialResult<RTreeStats> {
        let mut stats = RTreeStats {
            node_reads: self.node_reads(),
            ..RTreeStats::default()
        };
        let root_ref = match self.root_ref()? {
            Some(root_ref) => root_ref,
            None => return Ok(stats),
        };

        let mut pending = vec![(root_ref, 1u32)];
        while let Some((node_ref, depth)) = pending.pop() {
            let node = self.read_node(node_ref)?;
            stats.height = stats.height.max(depth);
            if node.is_leaf {
                stats.leaf_nodes += 1;
                stats.entries += node.len() as u64;
            } else {
                stats.internal_nodes += 1;
                for child in &node.entries {
                    pending.push((child_ref(child)?, depth + 1));
                }
            }
        }
        Ok(stats)
    }
}

fn child_ref(entry: &RTreeEntry) -> SpatialResult<NodeRef> {
    entry.pointer.node_ref().ok_or_else(|| {
        SpatialError::Corrupted(format!(
            "Internal node entry holds {:?} instead of a node reference",
            entry.pointer
        ))
    })
}

/// Child needing the least enlargement, ties broken by smallest area
fn choose_subtree(node: &RTreeNode, bounds: &RTreeBounds) -> Option<usize> {
    let mut best = None;
    let mut best_enlargement = f64::INFINITY;
    let mut best_area = f64::INFINITY;

    for (i, child) in node.entries.iter().enumerate() {
        let enlargement = match child.bounds.enlargement(bounds) {
            e if e.is_nan() => 0.0,
            e => e,
        };
        let area = child.bounds.area();
        if enlargement < best_enlargement
            || (enlargement == best_enlargement && area < best_area)
        {
            best_enlargement = enlargement;
            best_area = area;
            best = Some(i);
        }
    }
    best
}

fn sorted_by_center(entries: &[RTreeEntry], axis: Axis) -> Vec<RTreeEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        let (ax, ay) = a.bounds.center();
        let (bx, by) = b.bounds.center();
        match axis {
            Axis::X => ax.total_cmp(&bx),
            Axis::Y => ay.total_cmp(&by),
        }
    });
    sorted
}

/// Partition an overflowing node's entries in two.
///
/// Both center-sorted orders are cut at every position leaving at least
/// `min_fill` entries per side; the cut with the smallest summed area wins,
/// ties going to the smaller overlap.
fn split_entries(entries: Vec<RTreeEntry>, min_fill: usize) -> (Vec<RTreeEntry>, Vec<RTreeEntry>) {
    let n = entries.len();
    let min_fill = min_fill.clamp(1, (n / 2).max(1));

    let mut orders = [
        sorted_by_center(&entries, Axis::X),
        sorted_by_center(&entries, Axis::Y),
    ];

    // (area, overlap, order, cut)
    let mut best: Option<(f64, f64, usize, usize)> = None;
    for (order_index, order) in orders.iter().enumerate() {
        let mut prefix = Vec::with_capacity(n);
        let mut acc = RTreeBounds::empty();
        for entry in order {
            acc.extend(&entry.bounds);
            prefix.push(acc);
        }
        let mut suffix = vec![RTreeBounds::empty(); n + 1];
        for i in (0..n).rev() {
            suffix[i] = suffix[i + 1].union(&order[i].bounds);
        }

        for cut in min_fill..=n.saturating_sub(min_fill) {
            let left = prefix[cut - 1];
            let right = suffix[cut];
            let area = left.area() + right.area();
            let overlap = left.overlap_area(&right);
            let better = match best {
                None => true,
                Some((best_area, best_overlap, _, _)) => {
                    area < best_area || (area == best_area && overlap < best_overlap)
                }
            };
            if better {
                best = Some((area, overlap, order_index, cut));
            }
        }
    }

    let (order_index, cut) = best
        .map(|(_, _, order_index, cut)| (order_index, cut))
        .unwrap_or((0, n / 2));
    let mut chosen = std::mem::take(&mut orders[order_index]);
    let moved = chosen.split_off(cut);
    (chosen, moved)
}
