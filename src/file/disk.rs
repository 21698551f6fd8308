//! Disk-backed store file

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, VaultError};

use super::StoreFile;

/// Store file on the local filesystem
///
/// ## Concurrency:
/// - `file`: Mutex, since seek + read/write must not interleave
/// - `size`: Atomic, readable without the file lock
pub struct DiskFile {
    file: Mutex<File>,
    size: AtomicU64,
    read_only: bool,
}

impl DiskFile {
    /// Open a store file, creating it unless `read_only` is set
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };
        let size = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            size: AtomicU64::new(size),
            read_only,
        })
    }
}

impl StoreFile for DiskFile {
    fn read_fully(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_fully(&self, pos: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(VaultError::ReadOnly);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(data)?;
        self.size.fetch_max(pos + data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        if self.read_only {
            return Err(VaultError::ReadOnly);
        }
        let file = self.file.lock();
        file.set_len(size)?;
        self.size.store(size, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
