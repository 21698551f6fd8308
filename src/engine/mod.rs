//! Engine Module
//!
//! The storage engine that owns the free-space map and places chunks.
//!
//! ## Responsibilities
//! - Allocate file space for new chunks (honoring reservations and
//!   append-only mode)
//! - Relocate live chunks toward the start of the file (see `compact`)
//! - Truncate reclaimable space at the end of the file
//! - Count file reads and writes

mod compact;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::chunk::{layout, Chunk};
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::file::{StoreFile, WriteBufferPool};
use crate::free_space::{FreeSpaceMap, Reservation};
use crate::{BLOCK_SIZE, STORE_HEADER_BLOCKS};

/// State guarded by the engine lock
struct EngineState {
    /// Occupancy of every block in the file
    free_space: FreeSpaceMap,

    /// Interval pinned while the persistence callback runs mid-compaction
    reserved: Reservation,
}

/// Snapshot of file I/O counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub read_count: u64,
    pub read_bytes: u64,
    pub write_count: u64,
    pub write_bytes: u64,
}

#[derive(Default)]
struct IoCounters {
    read_count: AtomicU64,
    read_bytes: AtomicU64,
    write_count: AtomicU64,
    write_bytes: AtomicU64,
}

/// Block allocation and compaction engine
///
/// ## Concurrency Model: Single Writer
///
/// - `state`: one exclusive lock guards the free-space map, the pinned
///   reservation and every chunk move. Internal helpers take the locked
///   state by reference, so nested calls never lock twice.
/// - During compaction the lock is released only around
///   [`ChunkPersistence::store`](crate::persistence::ChunkPersistence::store)
///   and re-acquired before the next phase.
/// - `reuse_space` and the I/O counters are atomics, readable without the lock.
pub struct StorageEngine {
    /// Underlying file
    file: Arc<dyn StoreFile>,

    /// Free-space map and reservation
    state: Mutex<EngineState>,

    /// false = every new chunk is appended at the end of the file
    reuse_space: AtomicBool,

    /// Reusable buffers for chunk serialization
    buffers: WriteBufferPool,

    /// Read/write counters
    io: IoCounters,
}

impl StorageEngine {
    /// Create an engine over `file` with an empty free-space map
    pub fn new(file: Arc<dyn StoreFile>, config: &Config) -> Self {
        Self {
            file,
            state: Mutex::new(EngineState {
                free_space: FreeSpaceMap::new(STORE_HEADER_BLOCKS, BLOCK_SIZE),
                reserved: Reservation::NONE,
            }),
            reuse_space: AtomicBool::new(config.reuse_space),
            buffers: WriteBufferPool::new(config.write_buffer_pool_size),
            io: IoCounters::default(),
        }
    }

    // =========================================================================
    // Free-space accounting
    // =========================================================================

    /// Mark `[pos, pos + length)` as used
    pub fn mark_used(&self, pos: u64, length: u64) -> Result<()> {
        self.state.lock().free_space.mark_used(pos, length)
    }

    /// Mark `[pos, pos + length)` as free
    pub fn free(&self, pos: u64, length: u64) -> Result<()> {
        self.state.lock().free_space.free(pos, length)
    }

    /// Whether every block of `[pos, pos + length)` is used
    pub fn is_used(&self, pos: u64, length: u64) -> bool {
        self.state.lock().free_space.is_used(pos, length)
    }

    /// Reset the free-space map (only the store header stays used)
    pub fn clear(&self) {
        self.state.lock().free_space.clear();
    }

    pub fn set_reuse_space(&self, reuse: bool) {
        self.reuse_space.store(reuse, Ordering::SeqCst);
    }

    pub fn is_space_reused(&self) -> bool {
        self.reuse_space.load(Ordering::SeqCst)
    }

    /// Percentage of the in-use region occupied by chunks
    pub fn fill_rate(&self) -> u32 {
        self.state.lock().free_space.fill_rate()
    }

    /// Fill rate after `vacated_blocks` more blocks are freed
    pub fn projected_fill_rate(&self, vacated_blocks: u64) -> u32 {
        self.state.lock().free_space.projected_fill_rate(vacated_blocks)
    }

    pub fn is_fragmented(&self) -> bool {
        self.state.lock().free_space.is_fragmented()
    }

    /// Byte position of the first free block
    pub fn first_free(&self) -> u64 {
        self.state.lock().free_space.first_free()
    }

    /// Minimum file length that holds every used block
    pub fn file_length_in_use(&self) -> u64 {
        self.state.lock().free_space.last_free()
    }

    /// Last used block plus one
    pub fn after_last_block(&self) -> u64 {
        self.state.lock().free_space.after_last_block()
    }

    /// Relocation benefit of the chunk starting at `block`
    pub fn move_priority(&self, block: u64) -> u32 {
        self.state.lock().free_space.move_priority(block)
    }

    /// Chunks eligible for rewriting: `None` means no restriction, an empty
    /// list means nothing may be rewritten (append-only mode)
    pub fn rewrite_candidates(&self) -> Option<Vec<Chunk>> {
        if self.is_space_reused() {
            None
        } else {
            Some(Vec::new())
        }
    }

    // =========================================================================
    // Chunk allocation
    // =========================================================================

    /// Place a fully built chunk buffer in the file.
    ///
    /// `buf` must hold the chunk's placeholder header, payload and footer and
    /// be exactly `chunk.len` blocks long. On return `chunk.block` and
    /// `chunk.next` are set and the header and footer in `buf` carry them.
    pub fn allocate_chunk_space(&self, chunk: &mut Chunk, buf: &mut [u8]) -> Result<()> {
        if self.file.is_read_only() {
            return Err(VaultError::ReadOnly);
        }
        let expected = chunk.byte_len();
        if buf.len() as u64 != expected || expected == 0 {
            return Err(VaultError::InvariantViolation(format!(
                "Buffer of {} bytes does not match {} blocks of chunk {}",
                buf.len(),
                chunk.len,
                chunk.id
            )));
        }
        let payload_len = layout::payload_len(buf)?;

        let mut state = self.state.lock();
        let reserved_low = state.reserved.low;
        let reserved_high = match state.reserved.high {
            Some(high) if high > 0 => high,
            _ if self.is_space_reused() => 0,
            _ => self.append_boundary(&state),
        };
        let reservation = Reservation::bounded(reserved_low, reserved_high);

        let pos = state.free_space.allocate(expected, reservation);
        chunk.block = pos / BLOCK_SIZE;
        chunk.next = if reserved_low > 0 || reserved_high == reserved_low {
            state
                .free_space
                .predict_allocation(u64::from(chunk.len), Reservation::NONE)
        } else {
            0
        };
        layout::write_frame(buf, chunk, payload_len);

        self.validate_allocation(&state, chunk)?;
        trace!(chunk = %chunk, ?reservation, "allocated chunk space");
        Ok(())
    }

    /// First block at which append-only allocation may start
    fn append_boundary(&self, state: &EngineState) -> u64 {
        let file_blocks = self.file.size().div_ceil(BLOCK_SIZE);
        file_blocks.max(state.free_space.after_last_block())
    }

    fn validate_allocation(&self, state: &EngineState, chunk: &Chunk) -> Result<()> {
        if !state.free_space.is_used(chunk.start_pos(), chunk.byte_len()) {
            return Err(VaultError::InvariantViolation(format!(
                "{} is not marked used after allocation",
                chunk
            )));
        }
        if chunk.end_block() > state.free_space.after_last_block() {
            return Err(VaultError::InvariantViolation(format!(
                "{} ends beyond the in-use boundary {}",
                chunk,
                state.free_space.after_last_block()
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Shrink
    // =========================================================================

    /// Truncate the file to the in-use boundary if at least `min_percent`
    /// of it is reclaimable. Returns whether the file was truncated.
    pub fn shrink_if_possible(&self, min_percent: u32) -> Result<bool> {
        let state = self.state.lock();
        self.shrink_locked(&state, min_percent)
    }

    fn shrink_locked(&self, state: &EngineState, min_percent: u32) -> Result<bool> {
        if self.file.is_read_only() {
            return Ok(false);
        }
        let end = state.free_space.last_free();
        let file_size = self.file.size();
        if end >= file_size {
            return Ok(false);
        }
        if min_percent > 0 && file_size - end < BLOCK_SIZE {
            return Ok(false);
        }
        let saved_percent = 100 - end * 100 / file_size;
        if saved_percent < u64::from(min_percent) {
            return Ok(false);
        }

        self.sync()?;
        self.file.truncate(end)?;
        debug!(from = file_size, to = end, saved_percent, "shrank store file");
        Ok(true)
    }

    // =========================================================================
    // File access
    // =========================================================================

    pub fn read_fully(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.file.read_fully(pos, len)?;
        self.io.read_count.fetch_add(1, Ordering::Relaxed);
        self.io.read_bytes.fetch_add(len as u64, Ordering::Relaxed);
        Ok(data)
    }

    pub fn write_fully(&self, pos: u64, data: &[u8]) -> Result<()> {
        self.file.write_fully(pos, data)?;
        self.io.write_count.fetch_add(1, Ordering::Relaxed);
        self.io.write_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Current file length in bytes
    pub fn size(&self) -> u64 {
        self.file.size()
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    /// Take a zero-filled write buffer of `len` bytes
    pub fn acquire_write_buffer(&self, len: usize) -> BytesMut {
        self.buffers.acquire(len)
    }

    pub fn release_write_buffer(&self, buf: BytesMut) {
        self.buffers.release(buf);
    }

    pub fn io_stats(&self) -> IoStats {
        IoStats {
            read_count: self.io.read_count.load(Ordering::Relaxed),
            read_bytes: self.io.read_bytes.load(Ordering::Relaxed),
            write_count: self.io.write_count.load(Ordering::Relaxed),
            write_bytes: self.io.write_bytes.load(Ordering::Relaxed),
        }
    }
}
