//! On-disk layout of node slots and of the whole-tree storage descriptor.
//!
//! Node slots use a fixed little-endian layout so that every slot of a pool
//! has the same size:
//!
//! ```text
//! +-------------+-----------+------------------------------------------+
//! | count: u8   | leaf: u8  | max_node_capacity x entry cell           |
//! +-------------+-----------+------------------------------------------+
//! entry cell = tag: u8 | value (i64 row id or u32 slot) | 4 x f32 bounds
//! ```
//!
//! Unused trailing cells are zero-filled and never interpreted. The
//! descriptor is serialized with bincode.

use serde::{Deserialize, Serialize};

use super::allocator::AllocatorInfo;
use super::node::RTreeNode;
use super::rtree_config::RTreeConfig;
use super::rtree_constants::{
    LEAF_ENTRY_SIZE, MAGIC, NODE_ENTRY_SIZE, NODE_HEADER_SIZE, VERSION,
};
use super::rtree_types::{
    Pointer, Pool, RTreeBounds, RTreeEntry, SpatialError, SpatialResult,
};

const TAG_NULL: u8 = 0;
const TAG_ROW_ID: u8 = 1;
const TAG_LEAF_REF: u8 = 2;
const TAG_INTERNAL_REF: u8 = 3;

// ============================================================================
// Node Codec
// ============================================================================

/// Slot size of the pool a node of this kind lives in
pub fn slot_size(is_leaf: bool, config: &RTreeConfig) -> usize {
    if is_leaf {
        config.leaf_byte_size()
    } else {
        config.node_byte_size()
    }
}

/// Encode a node into a zero-filled buffer of exactly one slot
pub fn encode_node(node: &RTreeNode, config: &RTreeConfig) -> SpatialResult<Vec<u8>> {
    if node.len() > config.max_node_capacity() {
        return Err(SpatialError::InvalidOperation(format!(
            "Cannot encode node with {} entries (max {})",
            node.len(),
            config.max_node_capacity()
        )));
    }

    let mut buf = vec![0u8; slot_size(node.is_leaf, config)];
    buf[0] = node.len() as u8;
    buf[1] = node.is_leaf as u8;

    let cell_size = if node.is_leaf {
        LEAF_ENTRY_SIZE
    } else {
        NODE_ENTRY_SIZE
    };

    for (i, entry) in node.entries.iter().enumerate() {
        let start = NODE_HEADER_SIZE + i * cell_size;
        let cell = &mut buf[start..start + cell_size];
        let value_len = encode_pointer(&entry.pointer, node.is_leaf, cell)?;
        encode_bounds(&entry.bounds, &mut cell[1 + value_len..]);
    }

    Ok(buf)
}

/// Decode a node from its slot bytes
pub fn decode_node(bytes: &[u8], is_leaf: bool, config: &RTreeConfig) -> SpatialResult<RTreeNode> {
    let expected = slot_size(is_leaf, config);
    if bytes.len() != expected {
        return Err(SpatialError::Corrupted(format!(
            "Node slot has {} bytes, expected {}",
            bytes.len(),
            expected
        )));
    }

    let count = bytes[0] as usize;
    if count > config.max_node_capacity() {
        return Err(SpatialError::Corrupted(format!(
            "Node entry count {} exceeds capacity {}",
            count,
            config.max_node_capacity()
        )));
    }
    if (bytes[1] != 0) != is_leaf {
        return Err(SpatialError::Corrupted(
            "Node leaf flag does not match its pool".into(),
        ));
    }

    let cell_size = if is_leaf {
        LEAF_ENTRY_SIZE
    } else {
        NODE_ENTRY_SIZE
    };

    let mut entries = Vec::with_capacity(config.max_node_capacity() + 1);
    for i in 0..count {
        let start = NODE_HEADER_SIZE + i * cell_size;
        let cell = &bytes[start..start + cell_size];
        let (pointer, value_len) = decode_pointer(cell, is_leaf)?;
        let bounds = decode_bounds(&cell[1 + value_len..]);
        entries.push(RTreeEntry { pointer, bounds });
    }

    Ok(RTreeNode { is_leaf, entries })
}

/// Writes tag and value, returns the value width
fn encode_pointer(pointer: &Pointer, is_leaf: bool, cell: &mut [u8]) -> SpatialResult<usize> {
    match (pointer, is_leaf) {
        (Pointer::RowId(row_id), true) => {
            cell[0] = TAG_ROW_ID;
            cell[1..9].copy_from_slice(&row_id.to_le_bytes());
            Ok(8)
        }
        (Pointer::Node(node), false) => {
            cell[0] = match node.pool {
                Pool::Leaf => TAG_LEAF_REF,
                Pool::Internal => TAG_INTERNAL_REF,
            };
            cell[1..5].copy_from_slice(&node.slot.to_le_bytes());
            Ok(4)
        }
        (Pointer::Null, _) => Err(SpatialError::InvalidOperation(
            "Cannot store a null pointer in a node".into(),
        )),
        (other, _) => Err(SpatialError::InvalidOperation(format!(
            "Pointer {:?} cannot be stored in a {} node",
            other,
            if is_leaf { "leaf" } else { "internal" }
        ))),
    }
}

fn decode_pointer(cell: &[u8], is_leaf: bool) -> SpatialResult<(Pointer, usize)> {
    match (cell[0], is_leaf) {
        (TAG_ROW_ID, true) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&cell[1..9]);
            Ok((Pointer::RowId(i64::from_le_bytes(raw)), 8))
        }
        (TAG_LEAF_REF, false) | (TAG_INTERNAL_REF, false) => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&cell[1..5]);
            let slot = u32::from_le_bytes(raw);
            let pointer = if cell[0] == TAG_LEAF_REF {
                Pointer::leaf(slot)
            } else {
                Pointer::internal(slot)
            };
            Ok((pointer, 4))
        }
        (TAG_NULL, _) => Err(SpatialError::Corrupted(
            "Null pointer inside the used part of a node".into(),
        )),
        (tag, _) => Err(SpatialError::Corrupted(format!(
            "Pointer tag {} is not valid in a {} node",
            tag,
            if is_leaf { "leaf" } else { "internal" }
        ))),
    }
}

fn encode_bounds(bounds: &RTreeBounds, out: &mut [u8]) {
    out[0..4].copy_from_slice(&bounds.min_x.to_le_bytes());
    out[4..8].copy_from_slice(&bounds.min_y.to_le_bytes());
    out[8..12].copy_from_slice(&bounds.max_x.to_le_bytes());
    out[12..16].copy_from_slice(&bounds.max_y.to_le_bytes());
}

fn decode_bounds(raw: &[u8]) -> RTreeBounds {
    let read = |at: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&raw[at..at + 4]);
        f32::from_le_bytes(word)
    };
    RTreeBounds::new(read(0), read(4), read(8), read(12))
}

// ============================================================================
// Storage Descriptor
// ============================================================================

/// Everything needed to reload a tree: the root pointer and the metadata of
/// both allocator pools (leaf pool first, then internal pool).
///
/// The root pointer is only meaningful against these exact pool states, so
/// the three are always persisted and restored together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub magic: u32,
    pub version: u32,
    pub name: String,
    pub root: Pointer,
    pub allocator_infos: Vec<AllocatorInfo>,
}

impl StorageDescriptor {
    pub fn new(name: &str, root: Pointer, leaf_info: AllocatorInfo, node_info: AllocatorInfo) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            name: name.to_string(),
            root,
            allocator_infos: vec![leaf_info, node_info],
        }
    }

    pub fn leaf_info(&self) -> SpatialResult<&AllocatorInfo> {
        self.allocator_infos
            .first()
            .ok_or_else(|| SpatialError::Corrupted("Missing leaf allocator info".into()))
    }

    pub fn node_info(&self) -> SpatialResult<&AllocatorInfo> {
        self.allocator_infos
            .get(1)
            .ok_or_else(|| SpatialError::Corrupted("Missing node allocator info".into()))
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::Corrupted(
                "Invalid storage descriptor (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(SpatialError::Corrupted(format!(
                "Unsupported storage descriptor version {}",
                self.version
            )));
        }
        if self.allocator_infos.len() != 2 {
            return Err(SpatialError::Corrupted(format!(
                "Expected 2 allocator infos, found {}",
                self.allocator_infos.len()
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> SpatialResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::legacy())
            .map_err(|e| SpatialError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> SpatialResult<Self> {
        let descriptor: StorageDescriptor =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
                .map(|(descriptor, _)| descriptor)
                .map_err(|e| SpatialError::Serialization(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }
}
