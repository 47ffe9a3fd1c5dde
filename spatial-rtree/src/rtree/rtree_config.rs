//! Index configuration and option parsing.

use super::rtree_constants::{
    DEFAULT_MAX_NODE_CAPACITY, DEFAULT_MIN_NODE_CAPACITY, LEAF_ENTRY_SIZE, MAX_MAX_NODE_CAPACITY,
    MIN_CAPACITY_RATIO, MIN_MAX_NODE_CAPACITY, NODE_ENTRY_SIZE, NODE_HEADER_SIZE,
};
use super::rtree_types::{SpatialError, SpatialResult};

/// Option key for the maximum node capacity
pub const MAX_NODE_CAPACITY_OPTION: &str = "max_node_capacity";

/// Option key for the minimum node capacity
pub const MIN_NODE_CAPACITY_OPTION: &str = "min_node_capacity";

/// Node capacity bounds of an R-Tree.
///
/// Fixed at index creation. The capacities determine both the in-memory
/// entry vector size and the fixed slot size of the leaf and internal pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RTreeConfig {
    max_node_capacity: usize,
    min_node_capacity: usize,
}

impl RTreeConfig {
    /// Creates a validated configuration.
    ///
    /// `max_node_capacity` must lie in `4..=255` and `min_node_capacity` in
    /// `0..=max_node_capacity / 2`.
    pub fn new(max_node_capacity: usize, min_node_capacity: usize) -> SpatialResult<Self> {
        if max_node_capacity < MIN_MAX_NODE_CAPACITY {
            return Err(SpatialError::InvalidConfig(format!(
                "RTree: max_node_capacity must be at least {}",
                MIN_MAX_NODE_CAPACITY
            )));
        }
        if max_node_capacity > MAX_MAX_NODE_CAPACITY {
            return Err(SpatialError::InvalidConfig(format!(
                "RTree: max_node_capacity must be at most {}",
                MAX_MAX_NODE_CAPACITY
            )));
        }
        if min_node_capacity > max_node_capacity / 2 {
            return Err(SpatialError::InvalidConfig(
                "RTree: min_node_capacity must be at most 'max_node_capacity / 2'".into(),
            ));
        }
        Ok(Self {
            max_node_capacity,
            min_node_capacity,
        })
    }

    /// Parses index creation options.
    ///
    /// Keys are matched case-insensitively. When only the maximum capacity is
    /// given, the minimum defaults to 40% of it (rounded up). Unknown keys are
    /// ignored.
    pub fn from_options<'a, I>(options: I) -> SpatialResult<Self>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut max_option = None;
        let mut min_option = None;

        for (key, value) in options {
            if key.eq_ignore_ascii_case(MAX_NODE_CAPACITY_OPTION) {
                max_option = Some(value);
            } else if key.eq_ignore_ascii_case(MIN_NODE_CAPACITY_OPTION) {
                min_option = Some(value);
            } else {
                log::debug!("Ignoring unknown RTree option '{}'", key);
            }
        }

        let max_node_capacity = match max_option {
            Some(value) if value < MIN_MAX_NODE_CAPACITY as i64 => {
                return Err(SpatialError::InvalidConfig(format!(
                    "RTree: max_node_capacity must be at least {}",
                    MIN_MAX_NODE_CAPACITY
                )))
            }
            Some(value) if value > MAX_MAX_NODE_CAPACITY as i64 => {
                return Err(SpatialError::InvalidConfig(format!(
                    "RTree: max_node_capacity must be at most {}",
                    MAX_MAX_NODE_CAPACITY
                )))
            }
            Some(value) => value as usize,
            None => DEFAULT_MAX_NODE_CAPACITY,
        };

        let min_node_capacity = match (min_option, max_option) {
            (Some(value), _) if value < 0 => {
                return Err(SpatialError::InvalidConfig(
                    "RTree: min_node_capacity must be at least 0".into(),
                ))
            }
            (Some(value), _) => value as usize,
            (None, Some(_)) => (max_node_capacity as f64 * MIN_CAPACITY_RATIO).ceil() as usize,
            (None, None) => DEFAULT_MIN_NODE_CAPACITY,
        };

        Self::new(max_node_capacity, min_node_capacity)
    }

    pub fn max_node_capacity(&self) -> usize {
        self.max_node_capacity
    }

    pub fn min_node_capacity(&self) -> usize {
        self.min_node_capacity
    }

    /// Smallest number of entries each half of a split receives
    pub(crate) fn min_split_size(&self) -> usize {
        self.min_node_capacity.max(1)
    }

    /// Slot size of the leaf pool
    pub fn leaf_byte_size(&self) -> usize {
        NODE_HEADER_SIZE + self.max_node_capacity * LEAF_ENTRY_SIZE
    }

    /// Slot size of the internal node pool
    pub fn node_byte_size(&self) -> usize {
        NODE_HEADER_SIZE + self.max_node_capacity * NODE_ENTRY_SIZE
    }

    /// Rejects a layout whose slots do not fit into one block payload
    pub fn validate_layout(&self, max_payload: usize) -> SpatialResult<()> {
        if self.node_byte_size() > max_payload || self.leaf_byte_size() > max_payload {
            return Err(SpatialError::InvalidConfig(format!(
                "RTree: node ({} bytes) and/or leaf ({} bytes) capacity is too large to fit \
                 within the block payload of {} bytes",
                self.node_byte_size(),
                self.leaf_byte_size(),
                max_payload
            )));
        }
        Ok(())
    }
}

impl Default for RTreeConfig {
    fn default() -> Self {
        Self {
            max_node_capacity: DEFAULT_MAX_NODE_CAPACITY,
            min_node_capacity: DEFAULT_MIN_NODE_CAPACITY,
        }
    }
}
