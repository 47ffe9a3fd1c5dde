//! Fixed-size slot pools holding encoded nodes.
//!
//! Nodes never reference each other by address. A node reference is a slot
//! index resolved through the pool that issued it, which keeps the tree
//! relocatable and lets the pools be written to blocks as plain bytes.

use serde::{Deserialize, Serialize};

use super::rtree_storage::{BlockId, BlockStore};
use super::rtree_types::{Pool, SlotId, SpatialError, SpatialResult};

/// Persistent metadata of one slot pool. Opaque to the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorInfo {
    pub slot_size: u32,
    pub slots_per_buffer: u32,
    /// High-water mark: every slot below it has been handed out at least once
    pub next_slot: SlotId,
    pub free_slots: Vec<SlotId>,
    pub block_ids: Vec<BlockId>,
}

/// Allocator of fixed-size slots.
pub trait SlotAllocator: Send + Sync {
    /// Size of every slot in bytes
    fn slot_size(&self) -> usize;

    /// Hand out a zeroed slot
    fn allocate(&mut self) -> SpatialResult<SlotId>;

    /// Return a slot to the pool
    fn free(&mut self, slot: SlotId) -> SpatialResult<()>;

    /// Bytes of an allocated slot
    fn read(&self, slot: SlotId) -> SpatialResult<&[u8]>;

    /// Overwrite an allocated slot; `bytes` must be exactly one slot long
    fn write(&mut self, slot: SlotId, bytes: &[u8]) -> SpatialResult<()>;

    /// Number of slots currently allocated
    fn allocated_slots(&self) -> usize;

    /// Memory held by the pool's buffers
    fn in_memory_size(&self) -> usize;

    /// Release every slot
    fn reset(&mut self);

    /// Write the pool's buffers to `store` and describe where they went
    fn serialize(&mut self, store: &dyn BlockStore) -> SpatialResult<AllocatorInfo>;

    /// Restore the pool from metadata previously produced by `serialize`
    fn deserialize(&mut self, info: &AllocatorInfo, store: &dyn BlockStore) -> SpatialResult<()>;
}

struct SlotBuffer {
    data: Vec<u8>,
    block_id: Option<BlockId>,
    dirty: bool,
}

/// Slot pool packing slots into block-sized buffers.
///
/// Freed slots are reused last-in first-out. Buffers only grow while the
/// pool is in use; `reset` drops them and their blocks are released to the
/// store on the next `serialize`.
pub struct FixedSizeAllocator {
    pool: Pool,
    slot_size: usize,
    slots_per_buffer: usize,
    buffers: Vec<SlotBuffer>,
    occupied: Vec<bool>,
    free_slots: Vec<SlotId>,
    allocated: usize,
    released_blocks: Vec<BlockId>,
}

impl FixedSizeAllocator {
    /// Create an empty pool whose buffers fit into `max_payload` bytes
    pub fn new(pool: Pool, slot_size: usize, max_payload: usize) -> SpatialResult<Self> {
        if slot_size == 0 || slot_size > max_payload {
            return Err(SpatialError::InvalidConfig(format!(
                "Slot size {} does not fit a block payload of {} bytes",
                slot_size, max_payload
            )));
        }

        Ok(Self {
            pool,
            slot_size,
            slots_per_buffer: max_payload / slot_size,
            buffers: Vec::new(),
            occupied: Vec::new(),
            free_slots: Vec::new(),
            allocated: 0,
            released_blocks: Vec::new(),
        })
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn slots_per_buffer(&self) -> usize {
        self.slots_per_buffer
    }

    fn buffer_bytes(&self) -> usize {
        self.slots_per_buffer * self.slot_size
    }

    fn check_allocated(&self, slot: SlotId) -> SpatialResult<()> {
        if self.occupied.get(slot as usize).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(SpatialError::InvalidSlot {
                pool: self.pool,
                slot,
            })
        }
    }

    /// Buffer index and byte offset of a slot
    fn locate(&self, slot: SlotId) -> (usize, usize) {
        let slot = slot as usize;
        (
            slot / self.slots_per_buffer,
            (slot % self.slots_per_buffer) * self.slot_size,
        )
    }
}

impl SlotAllocator for FixedSizeAllocator {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn allocate(&mut self) -> SpatialResult<SlotId> {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                let (buffer, offset) = self.locate(slot);
                let slot_size = self.slot_size;
                let buffer = &mut self.buffers[buffer];
                buffer.data[offset..offset + slot_size].fill(0);
                buffer.dirty = true;
                self.occupied[slot as usize] = true;
                slot
            }
            None => {
                let slot = SlotId::try_from(self.occupied.len()).map_err(|_| {
                    SpatialError::InvalidOperation(format!("The {} pool is full", self.pool))
                })?;
                let (buffer, _) = self.locate(slot);
                if buffer == self.buffers.len() {
                    self.buffers.push(SlotBuffer {
                        data: vec![0u8; self.buffer_bytes()],
                        block_id: None,
                        dirty: true,
                    });
                }
                self.occupied.push(true);
                slot
            }
        };

        self.allocated += 1;
        Ok(slot)
    }

    fn free(&mut self, slot: SlotId) -> SpatialResult<()> {
        self.check_allocated(slot)?;
        self.occupied[slot as usize] = false;
        self.free_slots.push(slot);
        self.allocated -= 1;
        Ok(())
    }

    fn read(&self, slot: SlotId) -> SpatialResult<&[u8]> {
        self.check_allocated(slot)?;
        let (buffer, offset) = self.locate(slot);
        Ok(&self.buffers[buffer].data[offset..offset + self.slot_size])
    }

    fn write(&mut self, slot: SlotId, bytes: &[u8]) -> SpatialResult<()> {
        self.check_allocated(slot)?;
        if bytes.len() != self.slot_size {
            return Err(SpatialError::InvalidOperation(format!(
                "Slot write of {} bytes into {}-byte slots",
                bytes.len(),
                self.slot_size
            )));
        }
        let (buffer, offset) = self.locate(slot);
        let buffer = &mut self.buffers[buffer];
        buffer.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        buffer.dirty = true;
        Ok(())
    }

    fn allocated_slots(&self) -> usize {
        self.allocated
    }

    fn in_memory_size(&self) -> usize {
        self.buffers.len() * self.buffer_bytes()
    }

    fn reset(&mut self) {
        self.released_blocks
            .extend(self.buffers.iter().filter_map(|buffer| buffer.block_id));
        self.buffers.clear();
        self.occupied.clear();
        self.free_slots.clear();
        self.allocated = 0;
    }

    fn serialize(&mut self, store: &dyn BlockStore) -> SpatialResult<AllocatorInfo> {
        for block_id in self.released_blocks.drain(..) {
            store.free_block(block_id)?;
        }

        let mut written = 0;
        for buffer in &mut self.buffers {
            let block_id = match buffer.block_id {
                Some(block_id) => block_id,
                None => {
                    let block_id = store.allocate_block()?;
                    buffer.block_id = Some(block_id);
                    buffer.dirty = true;
                    block_id
                }
            };
            if buffer.dirty {
                store.write_block(block_id, &buffer.data)?;
                buffer.dirty = false;
                written += 1;
            }
        }
        log::trace!(
            "Serialized {} pool: {} of {} buffers written",
            self.pool,
            written,
            self.buffers.len()
        );

        Ok(AllocatorInfo {
            slot_size: self.slot_size as u32,
            slots_per_buffer: self.slots_per_buffer as u32,
            next_slot: self.occupied.len() as SlotId,
            free_slots: self.free_slots.clone(),
            block_ids: self
                .buffers
                .iter()
                .filter_map(|buffer| buffer.block_id)
                .collect(),
        })
    }

    fn deserialize(&mut self, info: &AllocatorInfo, store: &dyn BlockStore) -> SpatialResult<()> {
        if info.slot_size as usize != self.slot_size {
            return Err(SpatialError::Corrupted(format!(
                "The {} pool stores {}-byte slots but the index expects {}",
                self.pool, info.slot_size, self.slot_size
            )));
        }

        let slots_per_buffer = info.slots_per_buffer as usize;
        let buffer_bytes = slots_per_buffer * self.slot_size;
        if slots_per_buffer == 0 || buffer_bytes > store.max_payload() {
            return Err(SpatialError::Corrupted(format!(
                "Invalid buffer layout of {} slots for the {} pool",
                slots_per_buffer, self.pool
            )));
        }

        let next_slot = info.next_slot as usize;
        let required_buffers = next_slot.div_ceil(slots_per_buffer);
        if info.block_ids.len() < required_buffers {
            return Err(SpatialError::Corrupted(format!(
                "The {} pool needs {} buffers but only {} blocks are recorded",
                self.pool,
                required_buffers,
                info.block_ids.len()
            )));
        }

        let mut occupied = vec![true; next_slot];
        for &slot in &info.free_slots {
            match occupied.get_mut(slot as usize) {
                Some(flag) if *flag => *flag = false,
                _ => {
                    return Err(SpatialError::Corrupted(format!(
                        "Free slot {} is invalid in the {} pool",
                        slot, self.pool
                    )))
                }
            }
        }

        let mut buffers = Vec::with_capacity(info.block_ids.len());
        for &block_id in &info.block_ids {
            let data = store.read_block(block_id)?;
            if data.len() != buffer_bytes {
                return Err(SpatialError::Corrupted(format!(
                    "Block {} holds {} bytes, expected {}",
                    block_id,
                    data.len(),
                    buffer_bytes
                )));
            }
            buffers.push(SlotBuffer {
                data,
                block_id: Some(block_id),
                dirty: false,
            });
        }

        self.slots_per_buffer = slots_per_buffer;
        self.buffers = buffers;
        self.allocated = next_slot - info.free_slots.len();
        self.occupied = occupied;
        self.free_slots = info.free_slots.clone();
        Ok(())
    }
}
