//! # Spatial R-Tree - Disk-Resident Spatial Index
//!
//! This crate provides an R-Tree index over row identifiers for bounding-box
//! intersection queries. Nodes live in fixed-size slot pools that are written
//! to a block store, so an index can be persisted and reloaded without
//! rebuilding it.
//!
//! ## Features
//!
//! - **Slot-Based Nodes**: Nodes reference each other by slot id, never by address
//! - **Outward Rounding**: Double-precision boxes are stored as conservative `f32` bounds
//! - **Resumable Scans**: Results are produced in bounded batches
//! - **Persistent**: Pools are serialized to a block store with per-block checksums
//! - **Configurable**: Node capacities are set per index at creation time
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use spatial_rtree::{BoundingBox, IndexConstraintType, MemoryBlockStore, RTreeBounds, RTreeIndex};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryBlockStore::new());
//! let mut index = RTreeIndex::create(
//!     "places",
//!     IndexConstraintType::None,
//!     [("max_node_capacity", 16)],
//!     store,
//! )?;
//!
//! index.insert(
//!     &[Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0)), Some(BoundingBox::new(20.0, 20.0, 30.0, 30.0))],
//!     &[Some(1), Some(2)],
//! )?;
//!
//! let mut state = index.initialize_scan(&RTreeBounds::new(5.0, 5.0, 15.0, 15.0));
//! let row_ids = index.scan(&mut state, 1024)?;
//! assert_eq!(row_ids, vec![1]);
//! # Ok(())
//! # }
//! ```

pub mod bounding_box;
pub mod rtree;
pub mod rtree_index;

pub use bounding_box::{BoundingBox, GeometryBounds};
pub use rtree::{
    BlockStore, FileBlockStore, MemoryBlockStore, Pointer, RTree, RTreeBounds, RTreeConfig,
    RTreeEntry, RTreeScanner, RTreeStats, RowId, ScanDecision, SlotAllocator, SpatialError,
    SpatialResult, StorageDescriptor, DEFAULT_BLOCK_SIZE,
};
pub use rtree_index::{BatchOutcome, IndexConstraintType, RTreeIndex, RTreeIndexScanState};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
