//! In-memory store file
//!
//! Used for in-memory stores and for crash-point testing: with capture
//! enabled, every `sync()` records a copy of the content, which is exactly
//! what a process dying right after that sync would leave on disk.

use std::io;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, VaultError};

use super::StoreFile;

#[derive(Default)]
pub struct MemoryFile {
    data: RwLock<Vec<u8>>,
    read_only: bool,
    capture_syncs: bool,
    snapshots: Mutex<Vec<Vec<u8>>>,
}

impl MemoryFile {
    /// Empty, writable file
    pub fn new() -> Self {
        Self::default()
    }

    /// File preloaded with `bytes`
    pub fn from_bytes(bytes: Vec<u8>, read_only: bool) -> Self {
        Self {
            data: RwLock::new(bytes),
            read_only,
            ..Self::default()
        }
    }

    /// Empty file that records its content at every sync
    pub fn capturing_syncs() -> Self {
        Self {
            capture_syncs: true,
            ..Self::default()
        }
    }

    /// Copy of the current content
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Content captured at each sync, oldest first
    pub fn sync_snapshots(&self) -> Vec<Vec<u8>> {
        self.snapshots.lock().clone()
    }
}

impl StoreFile for MemoryFile {
    fn read_fully(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.data.read();
        let start = pos as usize;
        let end = start + len;
        if end > data.len() {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} beyond end of file ({})", start, end, data.len()),
            )));
        }
        Ok(data[start..end].to_vec())
    }

    fn write_fully(&self, pos: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(VaultError::ReadOnly);
        }
        let mut data = self.data.write();
        let start = pos as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.capture_syncs {
            let snapshot = self.data.read().clone();
            self.snapshots.lock().push(snapshot);
        }
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        if self.read_only {
            return Err(VaultError::ReadOnly);
        }
        self.data.write().truncate(size as usize);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
