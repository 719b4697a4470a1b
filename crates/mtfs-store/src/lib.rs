#![forbid(unsafe_code)]
//! Fixed-size block allocation over a backing file.
//!
//! Layout: an allocation bitmap (`BITMAP_BYTES`, 1 = allocated) at the
//! head of the file, followed by `MAX_BLOCKS` contiguous blocks of
//! `BLOCK_SIZE` bytes. The bitmap is the truth: reads and writes of
//! unallocated blocks are protocol errors. Every operation runs under one
//! critical section; the store owns its file handle and serializes I/O by
//! design.

use mtfs_error::{Result, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Default block payload size in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// Default number of blocks in a store.
pub const MAX_BLOCKS: usize = 1024;
/// Bitmap size for the default geometry.
pub const BITMAP_BYTES: usize = MAX_BLOCKS.div_ceil(8);

/// Identifier of one block within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.0)
    }
}

// ── Bitmap operations ───────────────────────────────────────────────────────

fn bitmap_get(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

fn bitmap_set(bitmap: &mut [u8], idx: usize) {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

fn bitmap_clear(bitmap: &mut [u8], idx: usize) {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

fn bitmap_find_free(bitmap: &[u8], count: usize) -> Option<usize> {
    (0..count).find(|&idx| !bitmap_get(bitmap, idx))
}

fn bitmap_count_free(bitmap: &[u8], count: usize) -> usize {
    (0..count).filter(|&idx| !bitmap_get(bitmap, idx)).count()
}

// ── Block store ─────────────────────────────────────────────────────────────

struct StoreState {
    file: File,
    bitmap: Vec<u8>,
}

/// Bitmap block store over a backing file.
pub struct BlockStore {
    path: PathBuf,
    block_size: usize,
    max_blocks: usize,
    bitmap_bytes: usize,
    state: Mutex<StoreState>,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .field("max_blocks", &self.max_blocks)
            .finish()
    }
}

impl BlockStore {
    /// Open (or create and zero-fill) a store with the default geometry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_geometry(path, BLOCK_SIZE, MAX_BLOCKS)
    }

    /// Open a store with explicit geometry. A fresh backing file is
    /// zero-filled to its full size; an existing file has its bitmap
    /// reloaded.
    pub fn open_with_geometry(
        path: impl AsRef<Path>,
        block_size: usize,
        max_blocks: usize,
    ) -> Result<Self> {
        if block_size == 0 || max_blocks == 0 {
            return Err(StoreError::Protocol(
                "block store geometry must be non-zero".into(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        let bitmap_bytes = max_blocks.div_ceil(8);
        let total_len = (bitmap_bytes + block_size * max_blocks) as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();
        let mut bitmap = vec![0_u8; bitmap_bytes];
        if existing < total_len {
            // Fresh or truncated store: extend to full size, bitmap clear.
            file.set_len(total_len)?;
            file.write_all_at(&bitmap, 0)?;
            info!(path = %path.display(), block_size, max_blocks, "block store formatted");
        } else {
            file.read_exact_at(&mut bitmap, 0)?;
            debug!(path = %path.display(), "block store bitmap reloaded");
        }

        Ok(Self {
            path,
            block_size,
            max_blocks,
            bitmap_bytes,
            state: Mutex::new(StoreState { file, bitmap }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks, allocated or not.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.max_blocks
    }

    /// Number of unallocated blocks.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        let state = self.state.lock();
        bitmap_count_free(&state.bitmap, self.max_blocks)
    }

    /// Whether a block is unallocated. Out-of-range ids read as free.
    #[must_use]
    pub fn is_free(&self, block: BlockId) -> bool {
        if block.0 as usize >= self.max_blocks {
            return true;
        }
        let state = self.state.lock();
        !bitmap_get(&state.bitmap, block.0 as usize)
    }

    fn block_offset(&self, block: BlockId) -> u64 {
        (self.bitmap_bytes + block.0 as usize * self.block_size) as u64
    }

    fn check_block(&self, block: BlockId) -> Result<()> {
        if block.0 as usize >= self.max_blocks {
            return Err(StoreError::Protocol(format!(
                "invalid block id {} (max {})",
                block.0, self.max_blocks
            )));
        }
        Ok(())
    }

    /// First-fit allocation. Persists the bitmap before returning.
    pub fn allocate(&self) -> Result<BlockId> {
        let mut state = self.state.lock();
        let Some(idx) = bitmap_find_free(&state.bitmap, self.max_blocks) else {
            return Err(StoreError::NoSpace);
        };
        bitmap_set(&mut state.bitmap, idx);
        self.save_bitmap(&state)?;
        trace!(block = idx, "block allocated");
        let id = u32::try_from(idx)
            .map_err(|_| StoreError::Protocol("block index does not fit u32".into()))?;
        Ok(BlockId(id))
    }

    /// Release an allocated block. Freeing a free or out-of-range block
    /// is a protocol error.
    pub fn free(&self, block: BlockId) -> Result<()> {
        self.check_block(block)?;
        let mut state = self.state.lock();
        if !bitmap_get(&state.bitmap, block.0 as usize) {
            return Err(StoreError::Protocol(format!("{block} is already free")));
        }
        bitmap_clear(&mut state.bitmap, block.0 as usize);
        self.save_bitmap(&state)?;
        trace!(block = block.0, "block freed");
        Ok(())
    }

    /// Read a full block. The block must be allocated.
    pub fn read_block(&self, block: BlockId) -> Result<Vec<u8>> {
        self.check_block(block)?;
        let state = self.state.lock();
        if !bitmap_get(&state.bitmap, block.0 as usize) {
            return Err(StoreError::Protocol(format!("read of unallocated {block}")));
        }
        let mut buf = vec![0_u8; self.block_size];
        state.file.read_exact_at(&mut buf, self.block_offset(block))?;
        Ok(buf)
    }

    /// Write up to `block_size` bytes into an allocated block; the
    /// remainder of the block is zero-padded.
    pub fn write_block(&self, block: BlockId, data: &[u8]) -> Result<()> {
        self.check_block(block)?;
        if data.len() > self.block_size {
            return Err(StoreError::Protocol(format!(
                "payload of {} bytes exceeds block size {}",
                data.len(),
                self.block_size
            )));
        }
        let state = self.state.lock();
        if !bitmap_get(&state.bitmap, block.0 as usize) {
            return Err(StoreError::Protocol(format!("write to unallocated {block}")));
        }
        let mut padded = vec![0_u8; self.block_size];
        padded[..data.len()].copy_from_slice(data);
        state.file.write_all_at(&padded, self.block_offset(block))?;
        Ok(())
    }

    /// Zero the bitmap and every block.
    pub fn format(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.bitmap.fill(0);
        let zero = vec![0_u8; self.block_size];
        for idx in 0..self.max_blocks {
            let offset = (self.bitmap_bytes + idx * self.block_size) as u64;
            state.file.write_all_at(&zero, offset)?;
        }
        self.save_bitmap(&state)?;
        info!(path = %self.path.display(), "block store formatted");
        Ok(())
    }

    /// Flush file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        state.file.sync_all()?;
        Ok(())
    }

    fn save_bitmap(&self, state: &StoreState) -> Result<()> {
        state.file.write_all_at(&state.bitmap, 0)?;
        Ok(())
    }
}
