//! Chunk header and footer encoding
//!
//! Both ends of a chunk carry its id, length and block so a reader can
//! validate identity and position without any external index.

use crate::error::{Result, VaultError};

use super::Chunk;

/// Magic bytes opening every chunk
pub(crate) const HEADER_MAGIC: &[u8; 4] = b"CHNK";

/// Magic bytes closing every chunk
pub(crate) const FOOTER_MAGIC: &[u8; 4] = b"CEND";

/// Current chunk format version
pub(crate) const FORMAT: u16 = 1;

/// Header size: Magic (4) + Format (2) + Reserved (2) + Id (4) + Len (4)
/// + Block (8) + Version (8) + Next (8) + PayloadLen (4) + CRC (4) = 48 bytes
pub const HEADER_SIZE: usize = 48;

/// Footer size: Id (4) + Len (4) + Block (8) + Version (8) + CRC (4) + Magic (4) = 32 bytes
pub const FOOTER_SIZE: usize = 32;

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: u32,
    pub len: u32,
    pub block: u64,
    pub version: u64,
    pub next: u64,
    pub payload_len: u32,
}

impl ChunkHeader {
    pub fn from_chunk(chunk: &Chunk, payload_len: u32) -> Self {
        Self {
            id: chunk.id,
            len: chunk.len,
            block: chunk.block,
            version: chunk.version,
            next: chunk.next,
            payload_len,
        }
    }

    /// Write the header into the first `HEADER_SIZE` bytes of `buf`
    pub fn encode_into(&self, buf: &mut [u8]) {
        let out = &mut buf[..HEADER_SIZE];
        out[0..4].copy_from_slice(HEADER_MAGIC);
        out[4..6].copy_from_slice(&FORMAT.to_le_bytes());
        out[6..8].copy_from_slice(&[0u8; 2]);
        out[8..12].copy_from_slice(&self.id.to_le_bytes());
        out[12..16].copy_from_slice(&self.len.to_le_bytes());
        out[16..24].copy_from_slice(&self.block.to_le_bytes());
        out[24..32].copy_from_slice(&self.version.to_le_bytes());
        out[32..40].copy_from_slice(&self.next.to_le_bytes());
        out[40..44].copy_from_slice(&self.payload_len.to_le_bytes());
        let crc = crc32fast::hash(&out[0..44]);
        out[44..48].copy_from_slice(&crc.to_le_bytes());
    }

    /// Parse and checksum the header at the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(VaultError::Corruption(format!(
                "Chunk header truncated: expected {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        let raw = &buf[..HEADER_SIZE];
        if &raw[0..4] != HEADER_MAGIC {
            return Err(VaultError::Corruption(format!(
                "Invalid chunk magic: expected CHNK, got {:?}",
                &raw[0..4]
            )));
        }
        let format = u16::from_le_bytes([raw[4], raw[5]]);
        if format != FORMAT {
            return Err(VaultError::Corruption(format!(
                "Unsupported chunk format: {}",
                format
            )));
        }
        let stored_crc = read_u32(raw, 44);
        let actual_crc = crc32fast::hash(&raw[0..44]);
        if stored_crc != actual_crc {
            return Err(VaultError::Corruption(format!(
                "Chunk header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }
        Ok(Self {
            id: read_u32(raw, 8),
            len: read_u32(raw, 12),
            block: read_u64(raw, 16),
            version: read_u64(raw, 24),
            next: read_u64(raw, 32),
            payload_len: read_u32(raw, 40),
        })
    }
}

// =============================================================================
// Footer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFooter {
    pub id: u32,
    pub len: u32,
    pub block: u64,
    pub version: u64,
}

impl ChunkFooter {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id,
            len: chunk.len,
            block: chunk.block,
            version: chunk.version,
        }
    }

    /// Write the footer into the last `FOOTER_SIZE` bytes of `buf`
    pub fn encode_into(&self, buf: &mut [u8]) {
        let start = buf.len() - FOOTER_SIZE;
        let out = &mut buf[start..];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.len.to_le_bytes());
        out[8..16].copy_from_slice(&self.block.to_le_bytes());
        out[16..24].copy_from_slice(&self.version.to_le_bytes());
        let crc = crc32fast::hash(&out[0..24]);
        out[24..28].copy_from_slice(&crc.to_le_bytes());
        out[28..32].copy_from_slice(FOOTER_MAGIC);
    }

    /// Parse and checksum the footer at the end of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_SIZE {
            return Err(VaultError::Corruption(format!(
                "Chunk footer truncated: expected {} bytes, got {}",
                FOOTER_SIZE,
                buf.len()
            )));
        }
        let raw = &buf[buf.len() - FOOTER_SIZE..];
        if &raw[28..32] != FOOTER_MAGIC {
            return Err(VaultError::Corruption(format!(
                "Invalid chunk footer magic: expected CEND, got {:?}",
                &raw[28..32]
            )));
        }
        let stored_crc = read_u32(raw, 24);
        if stored_crc != crc32fast::hash(&raw[0..24]) {
            return Err(VaultError::Corruption(
                "Chunk footer checksum mismatch".to_string(),
            ));
        }
        Ok(Self {
            id: read_u32(raw, 0),
            len: read_u32(raw, 4),
            block: read_u64(raw, 8),
            version: read_u64(raw, 16),
        })
    }
}

// =============================================================================
// Whole-chunk helpers
// =============================================================================

/// Write header and footer of `chunk` around an already placed payload
pub fn write_frame(buf: &mut [u8], chunk: &Chunk, payload_len: u32) {
    ChunkHeader::from_chunk(chunk, payload_len).encode_into(buf);
    ChunkFooter::from_chunk(chunk).encode_into(buf);
}

/// Payload length recorded in the header at the start of `buf`
pub fn payload_len(buf: &[u8]) -> Result<u32> {
    let header = ChunkHeader::decode(buf)?;
    if HEADER_SIZE + header.payload_len as usize + FOOTER_SIZE > buf.len() {
        return Err(VaultError::Corruption(format!(
            "Chunk payload of {} bytes does not fit in {} bytes",
            header.payload_len,
            buf.len()
        )));
    }
    Ok(header.payload_len)
}

/// Check that `buf` holds exactly the chunk described by `chunk`
pub fn validate(buf: &[u8], chunk: &Chunk) -> Result<ChunkHeader> {
    let header = ChunkHeader::decode(buf)?;
    let footer = ChunkFooter::decode(buf)?;

    let matches = |id: u32, len: u32, block: u64| {
        id == chunk.id && len == chunk.len && block == chunk.block
    };
    if !matches(header.id, header.len, header.block) {
        return Err(VaultError::Corruption(format!(
            "Chunk header (id {}, block {}, len {}) does not match {}",
            header.id, header.block, header.len, chunk
        )));
    }
    if !matches(footer.id, footer.len, footer.block) || footer.version != header.version {
        return Err(VaultError::Corruption(format!(
            "Chunk footer (id {}, block {}, len {}) does not match {}",
            footer.id, footer.block, footer.len, chunk
        )));
    }
    payload_len(buf)?;
    Ok(header)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;

    fn framed(chunk: &Chunk, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; chunk.len as usize * BLOCK_SIZE as usize];
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        write_frame(&mut buf, chunk, payload.len() as u32);
        buf
    }

    fn chunk_at(block: u64) -> Chunk {
        let mut chunk = Chunk::new(7, 3);
        chunk.block = block;
        chunk.len = 2;
        chunk.next = 40;
        chunk
    }

    #[test]
    fn test_header_and_footer_describe_chunk() {
        let chunk = chunk_at(12);
        let buf = framed(&chunk, b"payload");

        let header = validate(&buf, &chunk).unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(header.block, 12);
        assert_eq!(header.len, 2);
        assert_eq!(header.next, 40);
        assert_eq!(header.payload_len, 7);

        let footer = ChunkFooter::decode(&buf).unwrap();
        assert_eq!(footer.block, 12);
        assert_eq!(footer.version, 3);
    }

    #[test]
    fn test_validate_rejects_wrong_position() {
        let chunk = chunk_at(12);
        let buf = framed(&chunk, b"payload");

        let moved = chunk_at(30);
        assert!(matches!(validate(&buf, &moved), Err(VaultError::Corruption(_))));
    }

    #[test]
    fn test_header_checksum_detects_bit_flip() {
        let chunk = chunk_at(12);
        let mut buf = framed(&chunk, b"payload");
        buf[17] ^= 0x01;

        assert!(matches!(ChunkHeader::decode(&buf), Err(VaultError::Corruption(_))));
    }

    #[test]
    fn test_payload_len_rejects_oversized_payload() {
        let chunk = chunk_at(12);
        let mut buf = framed(&chunk, b"payload");
        ChunkHeader::from_chunk(&chunk, BLOCK_SIZE as u32 * 2).encode_into(&mut buf);

        assert!(matches!(payload_len(&buf), Err(VaultError::Corruption(_))));
    }
}
