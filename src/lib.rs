//! # ChunkVault
//!
//! Block allocation and online compaction for a log-structured, chunk-based
//! store file:
//! - Block-granularity free-space map with lowest-address-first placement
//! - Reservations that keep freshly vacated space untouched until the
//!   metadata describing the move is durable
//! - Online compaction that evacuates chunks from the end of the file into
//!   holes near its start, then truncates
//! - Crash-safe ordering: new copies are written before old space is freed
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ChunkStore                              │
//! │     (chunk registry, store header, commit, recovery)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  ChunkPersistence (register / store)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   StorageEngine                              │
//! │        (allocation, compaction phases, shrink)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ FreeSpaceMap│          │  StoreFile  │
//!   │  (bitset)   │          │ (disk/mem)  │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod file;
pub mod free_space;
pub mod chunk;
pub mod persistence;
pub mod engine;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VaultError};
pub use config::Config;
pub use chunk::Chunk;
pub use engine::{IoStats, StorageEngine};
pub use free_space::{FreeSpaceMap, Reservation};
pub use persistence::ChunkPersistence;
pub use store::ChunkStore;

// =============================================================================
// Layout Constants
// =============================================================================

/// Allocation quantum of the store file in bytes
pub const BLOCK_SIZE: u64 = 4096;

/// Blocks at the start of the file holding the store header copies
pub const STORE_HEADER_BLOCKS: u64 = 2;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ChunkVault
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
