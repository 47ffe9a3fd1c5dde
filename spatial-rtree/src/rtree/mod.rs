//! Disk-resident R-Tree over fixed-size slot pools.
//!
//! This module provides the index engine:
//! - Node model with a fixed on-disk slot layout per pool
//! - Insert with split propagation, delete with condense-and-reinsert
//! - Resumable, batch-friendly depth-first scans
//! - Whole-tree storage descriptors for reloading from a block store
//!
//! Nodes never hold native pointers to each other. Every reference is a slot
//! id inside either the leaf pool or the internal pool.

pub mod allocator;
pub mod node;
pub mod persistence;
pub mod rtree_config;
pub mod rtree_constants;
pub mod rtree_storage;
pub mod rtree_types;
pub mod scanner;
mod rtree_impl;

pub use allocator::{AllocatorInfo, FixedSizeAllocator, SlotAllocator};
pub use node::RTreeNode;
pub use persistence::StorageDescriptor;
pub use rtree_config::{RTreeConfig, MAX_NODE_CAPACITY_OPTION, MIN_NODE_CAPACITY_OPTION};
pub use rtree_constants::{DEFAULT_BLOCK_SIZE, STANDARD_VECTOR_SIZE};
pub use rtree_impl::RTree;
pub use rtree_storage::{BlockId, BlockStore, FileBlockStore, MemoryBlockStore};
pub use rtree_types::{
    NodeRef, Pointer, Pool, RTreeBounds, RTreeEntry, RTreeStats, RowId, SlotId, SpatialError,
    SpatialResult,
};
pub use scanner::{RTreeScanner, ScanDecision};
