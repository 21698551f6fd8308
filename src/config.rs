//! Configuration for ChunkVault
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, VaultError};
use crate::BLOCK_SIZE;

/// Main configuration for a ChunkVault store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Path of the store file
    /// Internal structure:
    ///   blocks 0..2   store header (two copies)
    ///   blocks 2..    chunks and free space
    pub path: PathBuf,

    /// Open the file without write access
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Allocation Configuration
    // -------------------------------------------------------------------------
    /// Place new chunks into free holes (true) or always append (false)
    pub reuse_space: bool,

    /// Number of reusable write buffers kept by the engine
    pub write_buffer_pool_size: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Fill rate (percent) below which maintenance compacts the file
    pub auto_compact_fill_rate: u32,

    /// Byte budget of a single compaction pass
    pub compact_move_size: u64,

    /// Upper bound on the duration of `compact_file` (milliseconds)
    pub max_compact_time_ms: u64,

    /// Minimum reclaimable percentage before the file is truncated on close
    pub shrink_min_percent: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chunkvault.db"),
            read_only: false,
            reuse_space: true,
            write_buffer_pool_size: 4,
            auto_compact_fill_rate: 90,
            compact_move_size: 16 * 1024 * 1024, // 16 MB
            max_compact_time_ms: 200,
            shrink_min_percent: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.auto_compact_fill_rate > 100 {
            return Err(VaultError::Config(format!(
                "auto_compact_fill_rate must be within 0..=100, got {}",
                self.auto_compact_fill_rate
            )));
        }
        if self.shrink_min_percent > 100 {
            return Err(VaultError::Config(format!(
                "shrink_min_percent must be within 0..=100, got {}",
                self.shrink_min_percent
            )));
        }
        if self.compact_move_size < BLOCK_SIZE {
            return Err(VaultError::Config(format!(
                "compact_move_size must be at least one block ({} bytes), got {}",
                BLOCK_SIZE, self.compact_move_size
            )));
        }
        if self.write_buffer_pool_size == 0 {
            return Err(VaultError::Config(
                "write_buffer_pool_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the store file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Open the store read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Enable or disable reuse of free holes for new chunks
    pub fn reuse_space(mut self, reuse: bool) -> Self {
        self.config.reuse_space = reuse;
        self
    }

    /// Set the number of pooled write buffers
    pub fn write_buffer_pool_size(mut self, size: usize) -> Self {
        self.config.write_buffer_pool_size = size;
        self
    }

    /// Set the fill rate (percent) that triggers maintenance compaction
    pub fn auto_compact_fill_rate(mut self, percent: u32) -> Self {
        self.config.auto_compact_fill_rate = percent;
        self
    }

    /// Set the byte budget of one compaction pass
    pub fn compact_move_size(mut self, bytes: u64) -> Self {
        self.config.compact_move_size = bytes;
        self
    }

    /// Set the time bound of `compact_file` (in milliseconds)
    pub fn max_compact_time_ms(mut self, ms: u64) -> Self {
        self.config.max_compact_time_ms = ms;
        self
    }

    /// Set the minimum reclaimable percentage for truncation on close
    pub fn shrink_min_percent(mut self, percent: u32) -> Self {
        self.config.shrink_min_percent = percent;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
