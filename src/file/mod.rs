//! File Module
//!
//! Raw positional I/O underneath the engine.
//!
//! ## Responsibilities
//! - Positional reads and writes of whole byte ranges
//! - fsync and truncation
//! - Reusable write buffers for chunk serialization
//!
//! Two backends are provided: [`DiskFile`] over `std::fs::File` and
//! [`MemoryFile`], an in-memory file that can capture its content at every
//! sync point.

mod disk;
mod memory;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use crate::error::Result;

pub use disk::DiskFile;
pub use memory::MemoryFile;

/// Positional file access used by the engine
pub trait StoreFile: Send + Sync {
    /// Read exactly `len` bytes starting at `pos`
    fn read_fully(&self, pos: u64, len: usize) -> Result<Vec<u8>>;

    /// Write all of `data` starting at `pos`, growing the file if needed
    fn write_fully(&self, pos: u64, data: &[u8]) -> Result<()>;

    /// Flush written data to stable storage
    fn sync(&self) -> Result<()>;

    /// Cut the file down to `size` bytes
    fn truncate(&self, size: u64) -> Result<()>;

    /// Current file length in bytes
    fn size(&self) -> u64;

    /// Whether writes are rejected
    fn is_read_only(&self) -> bool;
}

// =============================================================================
// Write Buffer Pool
// =============================================================================

/// Bounded pool of reusable write buffers
///
/// ## Concurrency:
/// - Lock-free queue; buffers are owned by the caller between acquire and release
/// - Released buffers beyond the pool capacity are dropped
pub struct WriteBufferPool {
    buffers: ArrayQueue<BytesMut>,
}

impl WriteBufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take a zero-filled buffer of exactly `len` bytes
    pub fn acquire(&self, len: usize) -> BytesMut {
        let mut buf = self.buffers.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Hand a buffer back for reuse
    pub fn release(&self, buf: BytesMut) {
        // Pool full: let the buffer drop
        let _ = self.buffers.push(buf);
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_zeroed_buffer() {
        let pool = WriteBufferPool::new(2);
        let mut buf = pool.acquire(16);
        buf[0] = 0xAB;
        pool.release(buf);

        let buf = pool.acquire(32);
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_release_beyond_capacity_drops() {
        let pool = WriteBufferPool::new(1);
        pool.release(pool.acquire(8));
        pool.release(BytesMut::zeroed(8));

        assert_eq!(pool.idle(), 1);
    }
}
