//! Free Space Module
//!
//! Block-granularity occupancy tracking for the store file.
//!
//! ## Responsibilities
//! - Track which blocks are used (store header, chunks) and which are free
//! - Lowest-address-first allocation that steers around a reserved interval
//! - Fill-rate and fragmentation statistics for compaction decisions
//! - Move priorities that rank chunks by the free space surrounding them
//!
//! ## Layout
//! ```text
//! block:  0   1   2   3   4   5   6   7   8   9  ...
//!       ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬─────────
//!       │ H │ H │ A │ A │   │   │ B │   │   │   │  (free)
//!       └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴─────────
//!         ▲       ▲       ▲           ▲
//!         │       │       first free  after last block
//!         │       first chunk block   (in-use boundary)
//!         store header (always used)
//! ```

mod bitset;

use tracing::trace;

use crate::error::{Result, VaultError};

use bitset::BitSet;

/// Fragmentation history length inspected by `is_fragmented`
const FAILURE_HISTORY_MASK: u32 = 0x0F;

// =============================================================================
// Reservation
// =============================================================================

/// Block interval `[low, high)` that allocation must treat as busy.
///
/// `high == None` is the "unbounded" form: every block from `low` up to the
/// in-use boundary is reserved and an overlapping request lands at the
/// in-use boundary. `Reservation::NONE` (`[0, 0)`) constrains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// First reserved block (inclusive)
    pub low: u64,
    /// End of the reserved area (exclusive); `None` means unbounded
    pub high: Option<u64>,
}

impl Reservation {
    /// No reserved blocks
    pub const NONE: Reservation = Reservation { low: 0, high: Some(0) };

    pub fn bounded(low: u64, high: u64) -> Self {
        Self { low, high: Some(high) }
    }

    pub fn unbounded(low: u64) -> Self {
        Self { low, high: None }
    }

    /// Whether a run of `blocks` starting at `start` touches the reservation
    pub fn overlaps(&self, start: u64, blocks: u64) -> bool {
        let below_high = match self.high {
            Some(high) => start < high,
            None => true,
        };
        below_high && start + blocks > self.low
    }
}

// =============================================================================
// Free Space Map
// =============================================================================

/// Occupancy map of the store file, one bit per block.
///
/// Blocks below `first_free_block` (the store header) are always used.
#[derive(Debug, Clone)]
pub struct FreeSpaceMap {
    /// Number of leading blocks reserved for the store header
    first_free_block: u64,
    /// Allocation quantum in bytes
    block_size: u64,
    /// 1 = used, 0 = free
    set: BitSet,
    /// Shift register of recent allocations that had to extend the file
    /// although enough free space existed in holes
    failure_flags: u32,
}

impl FreeSpaceMap {
    /// Create a map whose first `first_free_block` blocks are used
    pub fn new(first_free_block: u64, block_size: u64) -> Self {
        let mut map = Self {
            first_free_block,
            block_size,
            set: BitSet::new(),
            failure_flags: 0,
        };
        map.clear();
        map
    }

    /// Reset to the initial state (only the header blocks used)
    pub fn clear(&mut self) {
        self.set.clear();
        self.set.set_range(0, self.first_free_block);
        self.failure_flags = 0;
    }

    /// Check whether every block of `[pos, pos + length)` is used
    pub fn is_used(&self, pos: u64, length: u64) -> bool {
        let start = self.block(pos);
        let blocks = self.block_count(length);
        (start..start + blocks).all(|block| self.set.get(block))
    }

    /// Check whether every block of `[pos, pos + length)` is free
    pub fn is_free(&self, pos: u64, length: u64) -> bool {
        let start = self.block(pos);
        let blocks = self.block_count(length);
        match self.set.next_set_bit(start) {
            Some(used) => used >= start + blocks,
            None => true,
        }
    }

    /// Mark `[pos, pos + length)` as used.
    ///
    /// Fails without modifying the map if any block is already used, which
    /// means two chunks claim the same space.
    pub fn mark_used(&mut self, pos: u64, length: u64) -> Result<()> {
        let start = self.block(pos);
        let blocks = self.block_count(length);
        if !self.is_free(pos, length) {
            return Err(VaultError::Corruption(format!(
                "Double mark: blocks {}..{} overlap used space",
                start,
                start + blocks
            )));
        }
        self.set.set_range(start, start + blocks);
        Ok(())
    }

    /// Mark `[pos, pos + length)` as free.
    ///
    /// Fails without modifying the map if any block is already free.
    pub fn free(&mut self, pos: u64, length: u64) -> Result<()> {
        let start = self.block(pos);
        let blocks = self.block_count(length);
        if start < self.first_free_block {
            return Err(VaultError::Corruption(format!(
                "Attempt to free header block {}",
                start
            )));
        }
        if self.set.next_clear_bit(start) < start + blocks {
            return Err(VaultError::Corruption(format!(
                "Double free: blocks {}..{} are not all used",
                start,
                start + blocks
            )));
        }
        self.set.clear_range(start, start + blocks);
        Ok(())
    }

    /// Allocate `length` bytes outside `reservation`, returning the byte position
    pub fn allocate(&mut self, length: u64, reservation: Reservation) -> u64 {
        let blocks = self.block_count(length);
        let (start, at_tail, free_blocks_total) = self.search(blocks, reservation);
        debug_assert!(
            self.is_free(self.pos(start), length),
            "Double alloc: {}/{}",
            start,
            blocks
        );

        self.failure_flags <<= 1;
        if at_tail && free_blocks_total > 4 * blocks {
            self.failure_flags |= 1;
        }
        self.set.set_range(start, start + blocks);
        trace!(start, blocks, ?reservation, "allocated blocks");

        self.pos(start)
    }

    /// Block where `allocate` would place `blocks` blocks, without committing
    pub fn predict_allocation(&self, blocks: u64, reservation: Reservation) -> u64 {
        self.search(blocks, reservation).0
    }

    /// Lowest free run of at least `blocks` blocks outside `reservation`.
    ///
    /// Returns the start block, whether the run is the open-ended tail of the
    /// file, and the free blocks skipped on the way there.
    fn search(&self, blocks: u64, reservation: Reservation) -> (u64, bool, u64) {
        let mut free_blocks_total = 0;
        let mut from = 0;
        loop {
            let start = self.set.next_clear_bit(from);
            let end = self.set.next_set_bit(start + 1);
            let fits = end.map_or(true, |end| end - start >= blocks);
            if fits {
                if reservation.overlaps(start, blocks) {
                    match reservation.high {
                        Some(high) => {
                            from = high;
                            continue;
                        }
                        None => return (self.after_last_block(), true, free_blocks_total),
                    }
                }
                return (start, end.is_none(), free_blocks_total);
            }
            if let Some(end) = end {
                free_blocks_total += end - start;
                from = end;
            }
        }
    }

    /// True when recent allocations repeatedly had to grow the file even
    /// though plenty of free space was scattered across holes
    pub fn is_fragmented(&self) -> bool {
        (self.failure_flags & FAILURE_HISTORY_MASK).count_ones() > 1
    }

    /// Percentage of blocks below the in-use boundary that are occupied
    pub fn fill_rate(&self) -> u32 {
        self.projected_fill_rate(0)
    }

    /// Fill rate the file would have after `vacated_blocks` more blocks are freed
    pub fn projected_fill_rate(&self, vacated_blocks: u64) -> u32 {
        let total_blocks = self.set.length().saturating_sub(self.first_free_block);
        let used_blocks = self
            .set
            .cardinality()
            .saturating_sub(self.first_free_block + vacated_blocks);
        if used_blocks == 0 || total_blocks == 0 {
            return 0;
        }
        ((100 * used_blocks + total_blocks - 1) / total_blocks) as u32
    }

    /// Byte position of the first free block
    pub fn first_free(&self) -> u64 {
        self.pos(self.set.next_clear_bit(0))
    }

    /// Byte position of the in-use boundary (minimum file length)
    pub fn last_free(&self) -> u64 {
        self.pos(self.after_last_block())
    }

    /// Last used block plus one
    pub fn after_last_block(&self) -> u64 {
        self.set.length()
    }

    /// Number of used blocks, header included
    pub fn used_blocks(&self) -> u64 {
        self.set.cardinality()
    }

    /// Benefit of relocating the chunk starting at `block`.
    ///
    /// The used run containing `block` is compared with the free runs on
    /// both sides of it: a short run between long holes scores high. The
    /// open-ended tail of the file does not count as a hole. Free blocks
    /// score 0.
    pub fn move_priority(&self, block: u64) -> u32 {
        if !self.set.get(block) {
            return 0;
        }
        let (run_start, mut free_size) = match self.set.previous_clear_bit(block) {
            Some(prev_end) => {
                let hole_start = self.set.previous_set_bit(prev_end).map_or(0, |b| b + 1);
                (prev_end + 1, prev_end + 1 - hole_start)
            }
            None => (self.first_free_block.min(block), 0),
        };
        let next_start = self.set.next_clear_bit(block);
        if let Some(next_end) = self.set.next_set_bit(next_start) {
            free_size += next_end - next_start;
        }
        let used_size = next_start - run_start;
        let score = (free_size + 1) * 1000 / used_size.max(1);
        score.min(u64::from(u32::MAX)) as u32
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn pos(&self, block: u64) -> u64 {
        block * self.block_size
    }

    fn block(&self, pos: u64) -> u64 {
        pos / self.block_size
    }

    fn block_count(&self, length: u64) -> u64 {
        length.div_ceil(self.block_size)
    }
}
