//! Persistence collaborator
//!
//! The engine decides where chunks live; the collaborator owns the
//! authoritative id → chunk registry and knows how to persist it. During
//! compaction the engine reads the registry, hands every moved chunk back via
//! `register_chunk`, and calls `store` to make the new positions durable.

use crate::chunk::Chunk;
use crate::error::Result;

/// Owner of the chunk registry, driven by the engine during compaction
pub trait ChunkPersistence {
    /// Snapshot of all registered chunks
    fn chunks(&self) -> Vec<Chunk>;

    /// Current record of chunk `id`, if it is still registered
    fn chunk(&self, id: u32) -> Option<Chunk>;

    /// Install the new position of a moved chunk.
    ///
    /// Called only after the chunk's new copy has been fully written.
    fn register_chunk(&self, chunk: Chunk) -> Result<()>;

    /// Persist the current metadata, flush and fsync.
    ///
    /// Invoked with the engine lock released; may allocate and write chunks.
    fn store(&self) -> Result<()>;

    /// Chunk holding the current metadata root, if any
    fn last_chunk(&self) -> Option<Chunk>;
}
