//! Core types and data structures for the R-Tree index.
//!
//! This module defines the fundamental types used throughout the R-Tree:
//! - Error types and result types
//! - Single-precision index bounds
//! - Tagged pointers and entries
//! - Statistics structures

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Slot {slot} is not allocated in the {pool} pool")]
    InvalidSlot { pool: Pool, slot: SlotId },

    #[error("Corrupted index data: {0}")]
    Corrupted(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Row identifier of the host table. Opaque beyond equality.
pub type RowId = i64;

/// Slot index inside one allocator pool
pub type SlotId = u32;

// ============================================================================
// Bounds
// ============================================================================

/// Single-precision axis-aligned box used as the index key.
///
/// The empty box has its minimum corner at `+inf` and its maximum corner at
/// `-inf`, so it never intersects anything and is the identity of `union`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RTreeBounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl RTreeBounds {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn empty() -> Self {
        Self {
            min_x: f32::INFINITY,
            min_y: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            max_y: f32::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// `min <= max` on both axes. False for the empty box and for any NaN
    /// coordinate.
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Closed-interval intersection test. Touching edges intersect.
    pub fn intersects(&self, other: &RTreeBounds) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn contains(&self, other: &RTreeBounds) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn union(&self, other: &RTreeBounds) -> RTreeBounds {
        RTreeBounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn extend(&mut self, other: &RTreeBounds) {
        *self = self.union(other);
    }

    /// Area in double precision; zero for the empty box.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (self.max_x as f64 - self.min_x as f64) * (self.max_y as f64 - self.min_y as f64)
    }

    /// Area growth needed for this box to also cover `other`.
    ///
    /// Zero when the area does not change, including infinite boxes.
    pub fn enlargement(&self, other: &RTreeBounds) -> f64 {
        let area = self.area();
        let grown = self.union(other).area();
        if grown == area {
            0.0
        } else {
            grown - area
        }
    }

    pub fn overlap_area(&self, other: &RTreeBounds) -> f64 {
        if !self.intersects(other) {
            return 0.0;
        }
        let w = self.max_x.min(other.max_x) as f64 - self.min_x.max(other.min_x) as f64;
        let h = self.max_y.min(other.max_y) as f64 - self.min_y.max(other.min_y) as f64;
        w * h
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x as f64 + self.max_x as f64) / 2.0,
            (self.min_y as f64 + self.max_y as f64) / 2.0,
        )
    }
}

impl Default for RTreeBounds {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Pointers and Entries
// ============================================================================

/// The allocator pool a node lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    Leaf,
    Internal,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pool::Leaf => write!(f, "leaf"),
            Pool::Internal => write!(f, "internal"),
        }
    }
}

/// Reference to a node slot, only meaningful inside `pool`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub pool: Pool,
    pub slot: SlotId,
}

/// Tagged reference held by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Pointer {
    #[default]
    Null,
    RowId(RowId),
    Node(NodeRef),
}

impl Pointer {
    pub fn leaf(slot: SlotId) -> Self {
        Pointer::Node(NodeRef {
            pool: Pool::Leaf,
            slot,
        })
    }

    pub fn internal(slot: SlotId) -> Self {
        Pointer::Node(NodeRef {
            pool: Pool::Internal,
            slot,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Pointer::Null)
    }

    pub fn is_row_id(&self) -> bool {
        matches!(self, Pointer::RowId(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Pointer::Node(_))
    }

    pub fn row_id(&self) -> Option<RowId> {
        match self {
            Pointer::RowId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn node_ref(&self) -> Option<NodeRef> {
        match self {
            Pointer::Node(node) => Some(*node),
            _ => None,
        }
    }
}

/// A pointer paired with the bounds of everything it references
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RTreeEntry {
    pub pointer: Pointer,
    pub bounds: RTreeBounds,
}

impl RTreeEntry {
    pub fn new(pointer: Pointer, bounds: RTreeBounds) -> Self {
        Self { pointer, bounds }
    }

    /// Leaf payload entry for a row
    pub fn row(row_id: RowId, bounds: RTreeBounds) -> Self {
        Self {
            pointer: Pointer::RowId(row_id),
            bounds,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about the shape of an R-Tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RTreeStats {
    pub entries: u64,
    pub leaf_nodes: u64,
    pub internal_nodes: u64,
    pub height: u32,
    /// Node reads served since the tree was created or loaded
    pub node_reads: u64,
}
