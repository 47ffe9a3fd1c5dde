//! Host block storage used to persist allocator buffers.
//!
//! The index never talks to files directly. Allocator pools hand their
//! buffers to a [`BlockStore`] when the host asks for a storage descriptor,
//! and read them back when the index is reloaded. Two stores are provided:
//! an in-memory store and a single-file store with per-block checksums.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::rtree_constants::{BLOCK_HEADER_SIZE, DEFAULT_BLOCK_SIZE, MAGIC, VERSION};
use super::rtree_types::{SpatialError, SpatialResult};

/// Block identifier inside a store
pub type BlockId = u64;

/// Fixed-size block storage provided by the host.
pub trait BlockStore: Send + Sync {
    /// Total size of one block in bytes
    fn block_size(&self) -> usize;

    /// Bytes of one block usable for payload
    fn max_payload(&self) -> usize {
        self.block_size() - BLOCK_HEADER_SIZE
    }

    /// Reserve a fresh block
    fn allocate_block(&self) -> SpatialResult<BlockId>;

    /// Return a block to the store for reuse
    fn free_block(&self, block_id: BlockId) -> SpatialResult<()>;

    /// Read the payload of a block
    fn read_block(&self, block_id: BlockId) -> SpatialResult<Vec<u8>>;

    /// Overwrite the payload of a block
    fn write_block(&self, block_id: BlockId, data: &[u8]) -> SpatialResult<()>;

    /// Make all written blocks durable
    fn sync(&self) -> SpatialResult<()>;
}

fn check_payload(data: &[u8], max_payload: usize) -> SpatialResult<()> {
    if data.len() > max_payload {
        return Err(SpatialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Block payload too large: {} bytes (max {})",
                data.len(),
                max_payload
            ),
        )));
    }
    Ok(())
}

fn invalid_block(message: String) -> SpatialError {
    SpatialError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Block store kept entirely in memory
pub struct MemoryBlockStore {
    block_size: usize,
    state: RwLock<MemoryState>,
}

struct MemoryState {
    blocks: HashMap<BlockId, Vec<u8>>,
    next_block_id: BlockId,
    free_blocks: Vec<BlockId>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size,
            state: RwLock::new(MemoryState {
                blocks: HashMap::new(),
                next_block_id: 1,
                free_blocks: Vec::new(),
            }),
        }
    }

    /// Number of blocks currently holding data
    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate_block(&self) -> SpatialResult<BlockId> {
        let mut state = self.state.write();
        if let Some(block_id) = state.free_blocks.pop() {
            return Ok(block_id);
        }
        let block_id = state.next_block_id;
        state.next_block_id += 1;
        Ok(block_id)
    }

    fn free_block(&self, block_id: BlockId) -> SpatialResult<()> {
        let mut state = self.state.write();
        if block_id == 0 || block_id >= state.next_block_id {
            return Err(invalid_block(format!("Block {} was never allocated", block_id)));
        }
        if state.free_blocks.contains(&block_id) {
            return Err(invalid_block(format!("Block {} is already free", block_id)));
        }
        state.blocks.remove(&block_id);
        state.free_blocks.push(block_id);
        Ok(())
    }

    fn read_block(&self, block_id: BlockId) -> SpatialResult<Vec<u8>> {
        self.state.read().blocks.get(&block_id).cloned().ok_or_else(|| {
            SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Block {} has never been written", block_id),
            ))
        })
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> SpatialResult<()> {
        check_payload(data, self.max_payload())?;
        self.state.write().blocks.insert(block_id, data.to_vec());
        Ok(())
    }

    fn sync(&self) -> SpatialResult<()> {
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

/// File header stored in block 0 of a [`FileBlockStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub block_size: u32,
    pub next_block_id: BlockId,
    pub free_blocks: Vec<BlockId>,
    /// Opaque index descriptor kept by the host next to the blocks
    pub descriptor: Vec<u8>,
}

impl FileHeader {
    pub fn new(block_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            block_size: block_size as u32,
            next_block_id: 1,
            free_blocks: Vec::new(),
            descriptor: Vec::new(),
        }
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::InvalidOperation(
                "Invalid file format (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(SpatialError::InvalidOperation(
                "Unsupported file format version".into(),
            ));
        }
        Ok(())
    }
}

/// Block store backed by a single file.
///
/// Block 0 holds the bincode-encoded [`FileHeader`]. Every other block is
/// laid out as `crc32 (u32) | payload length (u32) | payload`, padded to the
/// block size. Each read or write is a single seek plus one I/O call.
pub struct FileBlockStore {
    file: RwLock<File>,
    path: PathBuf,
    block_size: usize,
    header: RwLock<FileHeader>,
}

impl FileBlockStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> SpatialResult<Self> {
        Self::create_with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    pub fn create_with_block_size(path: impl AsRef<Path>, block_size: usize) -> SpatialResult<Self> {
        if block_size <= BLOCK_HEADER_SIZE {
            return Err(SpatialError::InvalidConfig(format!(
                "Block size must exceed {} bytes",
                BLOCK_HEADER_SIZE
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let store = Self {
            file: RwLock::new(file),
            path: path.as_ref().to_path_buf(),
            block_size,
            header: RwLock::new(FileHeader::new(block_size)),
        };
        store.write_header()?;
        log::debug!("Created block store at {:?}", store.path);
        Ok(store)
    }

    /// Open an existing store file. Only the header is read.
    pub fn open(path: impl AsRef<Path>) -> SpatialResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let header = read_header(&mut file)?;
        header.validate()?;

        log::debug!(
            "Opened block store at {:?} ({} blocks, block size {})",
            path.as_ref(),
            header.next_block_id - 1,
            header.block_size
        );

        Ok(Self {
            file: RwLock::new(file),
            path: path.as_ref().to_path_buf(),
            block_size: header.block_size as usize,
            header: RwLock::new(header),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store the index descriptor in the file header
    pub fn write_descriptor(&self, descriptor: &[u8]) -> SpatialResult<()> {
        self.header.write().descriptor = descriptor.to_vec();
        self.write_header()
    }

    /// The index descriptor, if one was ever stored
    pub fn read_descriptor(&self) -> Option<Vec<u8>> {
        let header = self.header.read();
        if header.descriptor.is_empty() {
            None
        } else {
            Some(header.descriptor.clone())
        }
    }

    fn write_header(&self) -> SpatialResult<()> {
        let bytes = bincode::serde::encode_to_vec(&*self.header.read(), bincode::config::legacy())
            .map_err(|e| SpatialError::Serialization(e.to_string()))?;
        if bytes.len() > self.block_size {
            return Err(SpatialError::Serialization(format!(
                "File header too large: {} bytes (block size {})",
                bytes.len(),
                self.block_size
            )));
        }
        let mut padded = bytes;
        padded.resize(self.block_size, 0);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&padded)?;
        Ok(())
    }

    fn check_block_id(&self, block_id: BlockId) -> SpatialResult<()> {
        if block_id == 0 {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Block 0 is reserved for the header",
            )));
        }
        if block_id >= self.header.read().next_block_id {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Block {} was never allocated", block_id),
            )));
        }
        Ok(())
    }
}

fn read_header(file: &mut File) -> SpatialResult<FileHeader> {
    // magic, version and block size lead the header as fixed-width u32s
    file.seek(SeekFrom::Start(0))?;
    let mut prefix = [0u8; 12];
    file.read_exact(&mut prefix)?;

    let word = |at: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&prefix[at..at + 4]);
        u32::from_le_bytes(raw)
    };
    if word(0) != MAGIC {
        return Err(SpatialError::InvalidOperation(
            "Invalid file format (bad magic)".into(),
        ));
    }
    let block_size = word(8) as usize;
    if block_size <= BLOCK_HEADER_SIZE {
        return Err(SpatialError::InvalidOperation(
            "Invalid file format (bad block size)".into(),
        ));
    }

    file.seek(SeekFrom::Start(0))?;
    let mut buffer = vec![0u8; block_size];
    file.read_exact(&mut buffer)?;
    bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
        .map(|(header, _)| header)
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

impl BlockStore for FileBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate_block(&self) -> SpatialResult<BlockId> {
        let block_id = {
            let mut header = self.header.write();
            match header.free_blocks.pop() {
                Some(block_id) => block_id,
                None => {
                    let block_id = header.next_block_id;
                    header.next_block_id += 1;
                    block_id
                }
            }
        };
        self.write_header()?;
        Ok(block_id)
    }

    fn free_block(&self, block_id: BlockId) -> SpatialResult<()> {
        self.check_block_id(block_id)?;
        {
            let mut header = self.header.write();
            if header.free_blocks.contains(&block_id) {
                return Err(invalid_block(format!("Block {} is already free", block_id)));
            }
            header.free_blocks.push(block_id);
        }
        self.write_header()
    }

    fn read_block(&self, block_id: BlockId) -> SpatialResult<Vec<u8>> {
        self.check_block_id(block_id)?;

        let offset = block_id * self.block_size as u64;
        let mut buffer = vec![0u8; self.block_size];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&buffer[0..4]);
        let stored_checksum = u32::from_le_bytes(word);
        word.copy_from_slice(&buffer[4..8]);
        let len = u32::from_le_bytes(word) as usize;

        if len > self.max_payload() {
            return Err(SpatialError::Corrupted(format!(
                "Block {} declares {} payload bytes (max {})",
                block_id,
                len,
                self.max_payload()
            )));
        }

        let payload = buffer[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + len].to_vec();
        let checksum = crc32(&payload);
        if checksum != stored_checksum {
            return Err(SpatialError::Corrupted(format!(
                "Block {} checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
                block_id, stored_checksum, checksum
            )));
        }
        Ok(payload)
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> SpatialResult<()> {
        self.check_block_id(block_id)?;
        check_payload(data, self.max_payload())?;

        let mut buffer = Vec::with_capacity(self.block_size);
        buffer.extend_from_slice(&crc32(data).to_le_bytes());
        buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buffer.extend_from_slice(data);
        buffer.resize(self.block_size, 0);

        let offset = block_id * self.block_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buffer)?;
        Ok(())
    }

    fn sync(&self) -> SpatialResult<()> {
        self.write_header()?;
        self.file.write().sync_all()?;
        Ok(())
    }
}

/// CRC32-MPEG2
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    const POLY: u32 = 0x04C11DB7;

    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x80000000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }

    crc ^ 0xFFFFFFFF
}
