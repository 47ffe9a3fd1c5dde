//! Host-facing R-Tree index: option handling, batch maintenance, batched
//! scans and persistence through a block store.

use std::sync::Arc;

use crate::bounding_box::GeometryBounds;
use crate::rtree::{
    BlockStore, RTree, RTreeBounds, RTreeConfig, RTreeEntry, RTreeScanner, RTreeStats, RowId,
    ScanDecision, SlotAllocator, SpatialError, SpatialResult, StorageDescriptor,
    STANDARD_VECTOR_SIZE,
};

/// Constraint requested for a new index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexConstraintType {
    #[default]
    None,
    Unique,
    PrimaryKey,
}

/// Row counts of one insert or delete batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows inserted, or deleted rows that were found
    pub applied: usize,
    /// Deleted rows that were not in the index
    pub not_found: usize,
    /// Rows skipped for a null value, a null row id or missing bounds
    pub excluded: usize,
}

/// State of one index scan, advanced by [`RTreeIndex::scan`]
pub struct RTreeIndexScanState {
    query: RTreeBounds,
    scanner: RTreeScanner,
}

impl RTreeIndexScanState {
    pub fn query(&self) -> &RTreeBounds {
        &self.query
    }

    pub fn is_exhausted(&self) -> bool {
        self.scanner.is_exhausted()
    }
}

/// A named R-Tree index over row ids, persisted through a [`BlockStore`].
///
/// Mutations need `&mut self`. Hosts sharing an index between threads wrap it
/// in a lock and hold the write side for inserts, deletes and drops.
pub struct RTreeIndex {
    name: String,
    tree: RTree,
    store: Arc<dyn BlockStore>,
    excluded_rows: u64,
}

impl RTreeIndex {
    /// Index type name
    pub const TYPE_NAME: &'static str = "RTREE";

    /// Create an empty index.
    ///
    /// Fails if the options are invalid, a constraint is requested, or the
    /// node layout does not fit into one block of `store`.
    pub fn create<'a, I>(
        name: &str,
        constraint: IndexConstraintType,
        options: I,
        store: Arc<dyn BlockStore>,
    ) -> SpatialResult<Self>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let tree = Self::build_tree(name, constraint, options, store.as_ref())?;
        log::debug!(
            "Created {} index '{}' (max {}, min {})",
            Self::TYPE_NAME,
            name,
            tree.config().max_node_capacity(),
            tree.config().min_node_capacity()
        );

        Ok(Self {
            name: name.to_string(),
            tree,
            store,
            excluded_rows: 0,
        })
    }

    /// Reload an index from a descriptor produced by
    /// [`RTreeIndex::storage_descriptor`]. `options` must be the ones the
    /// index was created with.
    pub fn open<'a, I>(
        name: &str,
        constraint: IndexConstraintType,
        options: I,
        store: Arc<dyn BlockStore>,
        descriptor: &StorageDescriptor,
    ) -> SpatialResult<Self>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        descriptor.validate()?;
        let mut tree = Self::build_tree(name, constraint, options, store.as_ref())?;
        tree.leaf_allocator_mut()
            .deserialize(descriptor.leaf_info()?, store.as_ref())?;
        tree.node_allocator_mut()
            .deserialize(descriptor.node_info()?, store.as_ref())?;
        tree.set_root(descriptor.root)?;

        log::debug!(
            "Opened {} index '{}' ({} leaf / {} internal slots)",
            Self::TYPE_NAME,
            name,
            tree.leaf_allocator().allocated_slots(),
            tree.node_allocator().allocated_slots()
        );

        Ok(Self {
            name: name.to_string(),
            tree,
            store,
            excluded_rows: 0,
        })
    }

    fn build_tree<'a, I>(
        name: &str,
        constraint: IndexConstraintType,
        options: I,
        store: &dyn BlockStore,
    ) -> SpatialResult<RTree>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        if constraint != IndexConstraintType::None {
            return Err(SpatialError::NotImplemented(
                "RTree indexes do not support unique or primary key constraints".into(),
            ));
        }

        let config = RTreeConfig::from_options(options)?;
        config.validate_layout(store.max_payload()).map_err(|_| {
            SpatialError::InvalidConfig(format!(
                "Cannot instantiate RTree index: The node and/or leaf capacity of RTree index \
                 '{}' is too large to fit within the block size of {} bytes",
                name,
                store.block_size()
            ))
        })?;
        RTree::with_payload(config, store.max_payload())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &RTree {
        &self.tree
    }

    pub fn config(&self) -> &RTreeConfig {
        self.tree.config()
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// Prepare a scan for row ids whose bounds intersect `query`.
    ///
    /// No node is read when the tree is empty or its bounds miss the query.
    pub fn initialize_scan(&self, query: &RTreeBounds) -> RTreeIndexScanState {
        let mut scanner = RTreeScanner::new();
        let root = self.tree.root();
        if !root.pointer.is_null() && query.intersects(&root.bounds) {
            scanner.init(root);
        }
        RTreeIndexScanState {
            query: *query,
            scanner,
        }
    }

    /// Produce up to `capacity` more matching row ids.
    ///
    /// A batch shorter than `capacity` means the scan is complete.
    pub fn scan(
        &self,
        state: &mut RTreeIndexScanState,
        capacity: usize,
    ) -> SpatialResult<Vec<RowId>> {
        let mut row_ids = Vec::with_capacity(capacity.min(STANDARD_VECTOR_SIZE));
        if capacity == 0 {
            return Ok(row_ids);
        }

        let query = state.query;
        state.scanner.scan(&self.tree, |entry, _| {
            if !query.intersects(&entry.bounds) {
                return ScanDecision::Skip;
            }
            if let Some(row_id) = entry.pointer.row_id() {
                row_ids.push(row_id);
                if row_ids.len() == capacity {
                    return ScanDecision::Yield;
                }
            }
            ScanDecision::Continue
        })?;
        Ok(row_ids)
    }

    /// Every row id whose bounds intersect `query`, scanned in
    /// `STANDARD_VECTOR_SIZE` batches
    pub fn query(&self, query: &RTreeBounds) -> SpatialResult<Vec<RowId>> {
        let mut state = self.initialize_scan(query);
        let mut result = Vec::new();
        loop {
            let batch = self.scan(&mut state, STANDARD_VECTOR_SIZE)?;
            let done = batch.len() < STANDARD_VECTOR_SIZE;
            result.extend(batch);
            if done {
                return Ok(result);
            }
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Index a batch of rows.
    ///
    /// Rows with a null value, a null row id or no derivable bounds are
    /// skipped and counted as excluded.
    pub fn insert<G: GeometryBounds>(
        &mut self,
        values: &[Option<G>],
        row_ids: &[Option<RowId>],
    ) -> SpatialResult<BatchOutcome> {
        let (entries, excluded) = self.to_entries(values, row_ids)?;
        for entry in &entries {
            self.tree.insert(*entry)?;
        }
        Ok(BatchOutcome {
            applied: entries.len(),
            not_found: 0,
            excluded,
        })
    }

    /// Remove a batch of rows. Rows not in the index are ignored.
    pub fn delete<G: GeometryBounds>(
        &mut self,
        values: &[Option<G>],
        row_ids: &[Option<RowId>],
    ) -> SpatialResult<BatchOutcome> {
        let (entries, excluded) = self.to_entries(values, row_ids)?;
        let mut outcome = BatchOutcome {
            excluded,
            ..BatchOutcome::default()
        };
        for entry in &entries {
            if self.tree.delete(entry)? {
                outcome.applied += 1;
            } else {
                outcome.not_found += 1;
            }
        }
        Ok(outcome)
    }

    fn to_entries<G: GeometryBounds>(
        &mut self,
        values: &[Option<G>],
        row_ids: &[Option<RowId>],
    ) -> SpatialResult<(Vec<RTreeEntry>, usize)> {
        if values.len() != row_ids.len() {
            return Err(SpatialError::InvalidOperation(format!(
                "Batch has {} values but {} row ids",
                values.len(),
                row_ids.len()
            )));
        }

        let mut entries = Vec::with_capacity(values.len());
        for (value, row_id) in values.iter().zip(row_ids) {
            let bounds = value
                .as_ref()
                .and_then(|value| value.cached_bounds())
                .and_then(|bbox| bbox.to_index_bounds());
            if let (Some(bounds), Some(row_id)) = (bounds, row_id) {
                entries.push(RTreeEntry::row(*row_id, bounds));
            }
        }

        let excluded = values.len() - entries.len();
        if excluded > 0 {
            self.excluded_rows += excluded as u64;
            log::debug!(
                "Index '{}' skipped {} of {} rows without bounds or row id",
                self.name,
                excluded,
                values.len()
            );
        }
        Ok((entries, excluded))
    }

    /// Rows skipped by inserts and deletes since the index was created or opened
    pub fn excluded_rows(&self) -> u64 {
        self.excluded_rows
    }

    /// Drop every entry
    pub fn commit_drop(&mut self) {
        self.tree.reset();
        log::debug!("Dropped all entries of index '{}'", self.name);
    }

    /// Nothing to reclaim: freed slots are reused by later inserts
    pub fn vacuum(&mut self) {}

    pub fn merge_indexes(&mut self, _other: &RTreeIndex) -> SpatialResult<bool> {
        Err(SpatialError::NotImplemented(
            "RTreeIndex::merge_indexes() not implemented".into(),
        ))
    }

    pub fn verify_and_to_string(&self, _only_verify: bool) -> SpatialResult<String> {
        Err(SpatialError::NotImplemented(
            "RTreeIndex::verify_and_to_string() not implemented".into(),
        ))
    }

    /// Check that every allocated slot belongs to a reachable node
    pub fn verify_allocations(&self) -> SpatialResult<()> {
        let stats = self.tree.stats()?;
        let leaf_slots = self.tree.leaf_allocator().allocated_slots() as u64;
        let node_slots = self.tree.node_allocator().allocated_slots() as u64;
        if stats.leaf_nodes != leaf_slots || stats.internal_nodes != node_slots {
            return Err(SpatialError::Corrupted(format!(
                "Index '{}' reaches {} leaf / {} internal nodes but {} / {} slots are allocated",
                self.name, stats.leaf_nodes, stats.internal_nodes, leaf_slots, node_slots
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Persistence & statistics
    // ========================================================================

    /// Write both pools to the block store and describe the persisted tree
    pub fn storage_descriptor(&mut self) -> SpatialResult<StorageDescriptor> {
        let root = self.tree.root().pointer;
        let store = self.store.as_ref();
        let leaf_info = self.tree.leaf_allocator_mut().serialize(store)?;
        let node_info = self.tree.node_allocator_mut().serialize(store)?;
        log::debug!(
            "Serialized index '{}': {} leaf blocks, {} internal blocks",
            self.name,
            leaf_info.block_ids.len(),
            node_info.block_ids.len()
        );
        Ok(StorageDescriptor::new(&self.name, root, leaf_info, node_info))
    }

    /// Memory held by both slot pools
    pub fn in_memory_size(&self) -> usize {
        self.tree.in_memory_size()
    }

    pub fn stats(&self) -> SpatialResult<RTreeStats> {
        self.tree.stats()
    }
}
