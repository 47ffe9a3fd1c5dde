//! Constants for the R-Tree index.

/// Default maximum number of entries per node
pub const DEFAULT_MAX_NODE_CAPACITY: usize = 128;

/// Default minimum entries before underflow (40% of the default max, truncated)
pub const DEFAULT_MIN_NODE_CAPACITY: usize = 51;

/// Smallest accepted `max_node_capacity`
pub const MIN_MAX_NODE_CAPACITY: usize = 4;

/// Largest accepted `max_node_capacity`; the entry count is stored in one byte
pub const MAX_MAX_NODE_CAPACITY: usize = 255;

/// `min_node_capacity` derived from an explicit `max_node_capacity`
pub const MIN_CAPACITY_RATIO: f64 = 0.4;

/// Default block size of the host block store (256KB)
pub const DEFAULT_BLOCK_SIZE: usize = 262144;

/// Bytes reserved at the start of every block for checksum and length
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Default number of row ids produced by one scan call
pub const STANDARD_VECTOR_SIZE: usize = 2048;

/// Node slot header: entry count (u8) + leaf flag (u8)
pub const NODE_HEADER_SIZE: usize = 2;

/// Encoded bounds: four f32 values
pub const BOUNDS_SIZE: usize = 16;

/// Leaf entry cell: tag (u8) + row id (i64) + bounds
pub const LEAF_ENTRY_SIZE: usize = 1 + 8 + BOUNDS_SIZE;

/// Internal entry cell: tag (u8) + slot id (u32) + bounds
pub const NODE_ENTRY_SIZE: usize = 1 + 4 + BOUNDS_SIZE;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x53525452; // "SRTR" - Spatial R-Tree

/// File and descriptor format version
pub const VERSION: u32 = 1;
