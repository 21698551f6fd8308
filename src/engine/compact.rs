//! Online compaction
//!
//! Moves live chunks from the end of the file into free holes near its start
//! so the in-use boundary drops and the file can be truncated.
//!
//! ## Pass Structure
//! ```text
//!  select     pick chunks beyond the first free block, best move priority
//!             first, within the byte budget; apply in position order
//!  phase A    reserve [leftmost, original_end); move every candidate; store
//!  phase B    reserve [original_end, post_evacuation_end); retry candidates
//!             that could only land past original_end
//!  phase C    pull the metadata root chunk inside; store (and once more if
//!             the root is still outside)
//!  shrink     truncate to the in-use boundary; sync
//! ```
//!
//! Every move writes the new copy before freeing the old one, and every store
//! leaves the file recoverable, so a pass can be interrupted at any sync
//! point without losing data.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::chunk::{layout, Chunk, UNSAVED_BLOCK};
use crate::error::Result;
use crate::free_space::{FreeSpaceMap, Reservation};
use crate::persistence::ChunkPersistence;
use crate::BLOCK_SIZE;

use super::{EngineState, StorageEngine};

impl StorageEngine {
    /// Run one compaction pass moving at most `move_size` bytes.
    ///
    /// Returns false when no chunk qualified for relocation.
    pub fn compact_move_chunks(
        &self,
        move_size: u64,
        persistence: &dyn ChunkPersistence,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let start_block = state.free_space.first_free() / BLOCK_SIZE;
        let candidates = select_candidates(
            &state.free_space,
            persistence.chunks(),
            start_block,
            move_size,
        );
        match candidates {
            Some(moves) => {
                debug!(count = moves.len(), start_block, "relocating chunks");
                self.relocate(&mut state, moves, persistence)?;
                Ok(true)
            }
            None => {
                debug!(start_block, "no chunks qualify for relocation");
                Ok(false)
            }
        }
    }

    fn relocate(
        &self,
        state: &mut MutexGuard<'_, EngineState>,
        mut moves: Vec<Chunk>,
        persistence: &dyn ChunkPersistence,
    ) -> Result<()> {
        self.sync()?;

        let leftmost_block = moves[0].block;
        let original_block_count = state.free_space.after_last_block();

        // Phase A: chunks moved here must not land in space vacated by
        // earlier moves of the same phase until the metadata is durable.
        let reservation = Reservation::bounded(leftmost_block, original_block_count);
        for chunk in moves.iter_mut() {
            if let Some(moved) = self.move_chunk(state, chunk.id, reservation, persistence)? {
                *chunk = moved;
            }
        }
        self.store_unlocked(state, reservation, persistence)?;
        self.sync()?;

        let root = persistence.last_chunk();
        let post_evacuation_block_count = state.free_space.after_last_block();
        let root_already_inside = root.as_ref().map_or(true, |r| r.block < leftmost_block);
        let mut moved_to_eof = !root_already_inside;
        debug!(
            leftmost_block,
            original_block_count, post_evacuation_block_count, "phase A complete"
        );

        // Phase B: [leftmost, original) is free for reuse now, the area
        // vacated past it is not.
        let reservation =
            Reservation::bounded(original_block_count, post_evacuation_block_count);
        for chunk in moves.iter_mut() {
            if chunk.block < original_block_count {
                continue;
            }
            if let Some(moved) = self.move_chunk(state, chunk.id, reservation, persistence)? {
                *chunk = moved;
                moved_to_eof = true;
            }
        }

        // Phase C: the root chunk is rewritten by every store and may sit
        // past the new boundary.
        if moved_to_eof {
            if let Some(root) = root {
                let moved =
                    self.move_chunk_inside(state, &root, original_block_count, persistence)?;
                self.store_unlocked(
                    state,
                    Reservation::bounded(original_block_count, post_evacuation_block_count),
                    persistence,
                )?;
                self.sync()?;

                let last_boundary = if moved || root_already_inside {
                    post_evacuation_block_count
                } else {
                    root.block
                };
                let moved = !moved
                    && self.move_chunk_inside(state, &root, last_boundary, persistence)?;
                let last_moved = match persistence.last_chunk() {
                    Some(last) => {
                        self.move_chunk_inside(state, &last, last_boundary, persistence)?
                    }
                    None => false,
                };
                if last_moved || moved {
                    self.store_unlocked(
                        state,
                        Reservation::unbounded(last_boundary),
                        persistence,
                    )?;
                }
            }
        }

        self.shrink_locked(state, 0)?;
        self.sync()
    }

    /// Pin `reservation`, release the lock for the persistence callback,
    /// then re-acquire the lock and clear the pin
    fn store_unlocked(
        &self,
        state: &mut MutexGuard<'_, EngineState>,
        reservation: Reservation,
        persistence: &dyn ChunkPersistence,
    ) -> Result<()> {
        state.reserved = reservation;
        let stored = MutexGuard::unlocked(state, || persistence.store());
        state.reserved = Reservation::NONE;
        trace!(?reservation, "metadata stored");
        stored
    }

    /// Move `chunk` below `boundary`, but only if it currently sits at or
    /// past the boundary and a dry run says the move would land below it
    fn move_chunk_inside(
        &self,
        state: &mut EngineState,
        chunk: &Chunk,
        boundary: u64,
        persistence: &dyn ChunkPersistence,
    ) -> Result<bool> {
        let Some(current) = persistence.chunk(chunk.id) else {
            return Ok(false);
        };
        let reservation = Reservation::unbounded(boundary);
        let fits = current.block >= boundary
            && state
                .free_space
                .predict_allocation(u64::from(current.len), reservation)
                < boundary;
        if !fits {
            return Ok(false);
        }
        let moved = self.move_chunk(state, current.id, reservation, persistence)?;
        debug_assert!(moved.as_ref().map_or(true, |m| m.end_block() <= boundary));
        Ok(moved.is_some())
    }

    /// Copy chunk `id` to free space outside `reservation`.
    ///
    /// Returns the updated chunk, or `None` when the chunk is no longer
    /// registered (superseded by a concurrent commit). The old range is
    /// freed only after the new copy is written.
    fn move_chunk(
        &self,
        state: &mut EngineState,
        id: u32,
        reservation: Reservation,
        persistence: &dyn ChunkPersistence,
    ) -> Result<Option<Chunk>> {
        let Some(current) = persistence.chunk(id) else {
            trace!(id, "chunk no longer registered, skipping move");
            return Ok(None);
        };
        let start = current.start_pos();
        let length = current.byte_len();

        let source = self.read_fully(start, length as usize)?;
        let header = layout::validate(&source, &current)?;

        let mut buf = self.acquire_write_buffer(source.len());
        buf.copy_from_slice(&source);

        // Header/footer must not claim a position until one is allocated
        let mut moved = current.clone();
        moved.block = UNSAVED_BLOCK;
        moved.next = 0;
        layout::write_frame(&mut buf, &moved, header.payload_len);

        let pos = state.free_space.allocate(length, reservation);
        moved.block = pos / BLOCK_SIZE;
        debug_assert!(
            reservation.high.is_some() || moved.block <= current.block,
            "{} moved away from the start of the file",
            moved
        );
        layout::write_frame(&mut buf, &moved, header.payload_len);

        let written = self.write_fully(pos, &buf);
        self.release_write_buffer(buf);
        if let Err(e) = written {
            state.free_space.free(pos, length)?;
            return Err(e);
        }

        state.free_space.free(start, length)?;
        persistence.register_chunk(moved.clone())?;
        trace!(from = current.block, to = moved.block, id, "moved chunk");
        Ok(Some(moved))
    }
}

// =============================================================================
// Candidate selection
// =============================================================================

/// Heap entry ordered so that the chunk to evict first is the greatest:
/// lowest move priority, then highest block
struct Candidate(Chunk);

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .collect_priority
            .cmp(&self.0.collect_priority)
            .then_with(|| self.0.block.cmp(&other.0.block))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Pick saved chunks past `start_block` whose combined length fits in
/// `move_size`, preferring high move priority. Returns them in file
/// position order, or `None` when nothing qualifies.
pub(crate) fn select_candidates(
    free_space: &FreeSpaceMap,
    chunks: Vec<Chunk>,
    start_block: u64,
    move_size: u64,
) -> Option<Vec<Chunk>> {
    let max_blocks_to_move = move_size / BLOCK_SIZE;
    if max_blocks_to_move == 0 {
        return None;
    }

    let mut queue = BinaryHeap::with_capacity(chunks.len() / 2 + 1);
    let mut size = 0u64;
    for mut chunk in chunks {
        if !chunk.is_saved() || chunk.block <= start_block {
            continue;
        }
        if !free_space.is_used(chunk.start_pos(), chunk.byte_len()) {
            warn!(chunk = %chunk, "registered chunk is not marked used, skipping");
            continue;
        }
        chunk.collect_priority = free_space.move_priority(chunk.block);
        size += u64::from(chunk.len);
        queue.push(Candidate(chunk));
        while size > max_blocks_to_move {
            match queue.pop() {
                Some(Candidate(evicted)) => size -= u64::from(evicted.len),
                None => break,
            }
        }
    }

    if queue.is_empty() {
        return None;
    }
    let mut list: Vec<Chunk> = queue.into_iter().map(|c| c.0).collect();
    list.sort_by_key(|c| c.block);
    Some(list)
}
