//! Chunk Module
//!
//! A chunk is one contiguous, self-describing region of the store file.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (48 bytes)                                       │
//! │   Magic "CHNK" | Format | Id | Len | Block | Version    │
//! │   Next | PayloadLen | CRC32                             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Payload (PayloadLen bytes)                              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Zero padding up to the footer                           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (32 bytes, ends on the chunk's last block)       │
//! │   Id | Len | Block | Version | CRC32 | Magic "CEND"     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `len * BLOCK_SIZE` always equals the serialized length.

pub mod layout;

use serde::{Deserialize, Serialize};

use crate::BLOCK_SIZE;

pub use layout::{ChunkFooter, ChunkHeader, FOOTER_SIZE, HEADER_SIZE};

/// Sentinel block value of a chunk that has no file position yet
pub const UNSAVED_BLOCK: u64 = u64::MAX;

/// Metadata record of one persisted region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identity, unchanged by moves
    pub id: u32,
    /// First block of the chunk (`UNSAVED_BLOCK` until allocated)
    pub block: u64,
    /// Length in blocks, header and footer included
    pub len: u32,
    /// Store version the chunk was written for
    pub version: u64,
    /// Payload bytes written
    pub max_len: u64,
    /// Payload bytes still referenced
    pub max_len_live: u64,
    /// Predicted block of the following chunk (0 = right after this one)
    pub next: u64,
    /// Relocation benefit, only meaningful during candidate selection
    #[serde(skip)]
    pub collect_priority: u32,
}

impl Chunk {
    /// Create an unsaved chunk
    pub fn new(id: u32, version: u64) -> Self {
        Self {
            id,
            block: UNSAVED_BLOCK,
            len: 0,
            version,
            max_len: 0,
            max_len_live: 0,
            next: 0,
            collect_priority: 0,
        }
    }

    /// Number of blocks needed to hold `payload_len` bytes plus header and footer
    pub fn blocks_for(payload_len: usize) -> u32 {
        let total = (HEADER_SIZE + payload_len + FOOTER_SIZE) as u64;
        total.div_ceil(BLOCK_SIZE) as u32
    }

    /// Whether the chunk has a position in the file
    pub fn is_saved(&self) -> bool {
        self.block != UNSAVED_BLOCK
    }

    /// Percentage of payload bytes still referenced
    pub fn fill_rate(&self) -> u32 {
        if self.max_len_live == 0 {
            0
        } else if self.max_len_live >= self.max_len {
            100
        } else {
            (1 + self.max_len_live * 99 / self.max_len) as u32
        }
    }

    /// Byte position of the chunk in the file
    pub fn start_pos(&self) -> u64 {
        self.block * BLOCK_SIZE
    }

    /// Serialized length in bytes
    pub fn byte_len(&self) -> u64 {
        u64::from(self.len) * BLOCK_SIZE
    }

    /// Block right after the chunk
    pub fn end_block(&self) -> u64 {
        self.block + u64::from(self.len)
    }

    /// Whether the block ranges of two saved chunks intersect
    pub fn overlaps(&self, other: &Chunk) -> bool {
        self.is_saved()
            && other.is_saved()
            && self.block < other.end_block()
            && other.block < self.end_block()
    }
}

impl std::fmt::Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_saved() {
            write!(
                f,
                "chunk {} @ {}..{} (v{}, next {})",
                self.id,
                self.block,
                self.end_block(),
                self.version,
                self.next
            )
        } else {
            write!(f, "chunk {} (unsaved, v{})", self.id, self.version)
        }
    }
}
