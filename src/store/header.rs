//! Store header
//!
//! Two identical copies live in blocks 0 and 1. Each points at the current
//! root chunk; on open the valid copy with the highest version wins.
//!
//! ## Format (per copy, little-endian)
//! ```text
//! ┌──────────┬────────┬─────────┬─────────┬────────────┬──────────┬───────┐
//! │ Magic(8) │ Fmt(2) │ Ver(8)  │ Root(4) │ RootBlk(8) │ RootLen(4)│ CRC(4)│
//! └──────────┴────────┴─────────┴─────────┴────────────┴──────────┴───────┘
//! ```

use crate::chunk::{Chunk, UNSAVED_BLOCK};
use crate::error::{Result, VaultError};
use crate::{BLOCK_SIZE, STORE_HEADER_BLOCKS};

const MAGIC: &[u8; 8] = b"CVSTORE\0";
const FORMAT: u16 = 1;

/// Encoded size of one header copy
const ENCODED_SIZE: usize = 8 + 2 + 8 + 4 + 8 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Version of the last durable commit
    pub version: u64,
    pub root_id: u32,
    /// `UNSAVED_BLOCK` while the store has never been committed
    pub root_block: u64,
    pub root_len: u32,
}

impl StoreHeader {
    /// Header of a store without any commit
    pub fn empty() -> Self {
        Self {
            version: 0,
            root_id: 0,
            root_block: UNSAVED_BLOCK,
            root_len: 0,
        }
    }

    pub fn for_root(version: u64, root: &Chunk) -> Self {
        Self {
            version,
            root_id: root.id,
            root_block: root.block,
            root_len: root.len,
        }
    }

    pub fn has_root(&self) -> bool {
        self.root_block != UNSAVED_BLOCK && self.root_len > 0
    }

    /// Both copies, laid out over the header blocks
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; (STORE_HEADER_BLOCKS * BLOCK_SIZE) as usize];
        for copy in buf.chunks_mut(BLOCK_SIZE as usize) {
            self.encode_copy(copy);
        }
        buf
    }

    fn encode_copy(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(MAGIC);
        out[8..10].copy_from_slice(&FORMAT.to_le_bytes());
        out[10..18].copy_from_slice(&self.version.to_le_bytes());
        out[18..22].copy_from_slice(&self.root_id.to_le_bytes());
        out[22..30].copy_from_slice(&self.root_block.to_le_bytes());
        out[30..34].copy_from_slice(&self.root_len.to_le_bytes());
        let crc = crc32fast::hash(&out[0..34]);
        out[34..38].copy_from_slice(&crc.to_le_bytes());
    }

    /// Pick the newest valid copy out of the header blocks
    pub fn decode(buf: &[u8]) -> Result<Self> {
        buf.chunks(BLOCK_SIZE as usize)
            .take(STORE_HEADER_BLOCKS as usize)
            .filter_map(Self::decode_copy)
            .max_by_key(|header| header.version)
            .ok_or_else(|| VaultError::Corruption("No valid store header found".to_string()))
    }

    fn decode_copy(raw: &[u8]) -> Option<Self> {
        if raw.len() < ENCODED_SIZE || &raw[0..8] != MAGIC {
            return None;
        }
        if u16::from_le_bytes([raw[8], raw[9]]) != FORMAT {
            return None;
        }
        let stored_crc = u32::from_le_bytes(raw[34..38].try_into().ok()?);
        if stored_crc != crc32fast::hash(&raw[0..34]) {
            return None;
        }
        Some(Self {
            version: u64::from_le_bytes(raw[10..18].try_into().ok()?),
            root_id: u32::from_le_bytes(raw[18..22].try_into().ok()?),
            root_block: u64::from_le_bytes(raw[22..30].try_into().ok()?),
            root_len: u32::from_le_bytes(raw[30..34].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoreHeader {
        StoreHeader {
            version: 7,
            root_id: 12,
            root_block: 40,
            root_len: 3,
        }
    }

    #[test]
    fn test_decode_reads_back_header() {
        let buf = sample().encode();
        assert_eq!(buf.len() as u64, STORE_HEADER_BLOCKS * BLOCK_SIZE);
        assert_eq!(StoreHeader::decode(&buf).unwrap(), sample());
    }

    #[test]
    fn test_surviving_copy_is_used() {
        let mut buf = sample().encode();
        buf[20] ^= 0xFF;

        assert_eq!(StoreHeader::decode(&buf).unwrap(), sample());
    }

    #[test]
    fn test_newest_copy_wins() {
        let mut buf = sample().encode();
        let newer = StoreHeader {
            version: 8,
            root_block: 90,
            ..sample()
        };
        let newer_buf = newer.encode();
        let block = BLOCK_SIZE as usize;
        buf[block..].copy_from_slice(&newer_buf[block..]);

        assert_eq!(StoreHeader::decode(&buf).unwrap(), newer);
    }

    #[test]
    fn test_both_copies_damaged() {
        let mut buf = sample().encode();
        buf[0] = b'X';
        buf[BLOCK_SIZE as usize] = b'X';

        assert!(matches!(StoreHeader::decode(&buf), Err(VaultError::Corruption(_))));
    }

    #[test]
    fn test_empty_header_has_no_root() {
        assert!(!StoreHeader::empty().has_root());
        assert!(sample().has_root());
    }
}
