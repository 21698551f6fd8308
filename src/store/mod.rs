//! Store Module
//!
//! A chunk store built on the engine: it owns the chunk registry, persists it
//! as a root chunk, and points at that root from the store header.
//!
//! ## Responsibilities
//! - Write, read and remove data chunks
//! - Commit: make the registry durable (root chunk, then store header)
//! - Recovery: rebuild the free-space map from the registry on open
//! - Drive compaction and shrink
//!
//! ## Commit Ordering
//! ```text
//! write root chunk ─► fsync ─► write store header ─► fsync ─► free old root
//!                                                             free removed chunks
//! ```
//! A crash at any point leaves either the old or the new root reachable.

mod header;
mod registry;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::chunk::{layout, Chunk, HEADER_SIZE};
use crate::config::Config;
use crate::engine::StorageEngine;
use crate::error::{Result, VaultError};
use crate::file::{DiskFile, MemoryFile, StoreFile};
use crate::persistence::ChunkPersistence;
use crate::{BLOCK_SIZE, STORE_HEADER_BLOCKS};

use header::StoreHeader;
use registry::{Registry, RegistrySnapshot};

/// Chunk store over a single file
///
/// ## Concurrency Model: Single Writer / Multiple Reader
///
/// - **Writes** (write/remove/commit/compact): serialized by `write_lock`.
///   The lock is reentrant because compaction calls back into `store()`
///   on the same thread.
/// - **Reads** (read_chunk, accessors): take only the registry read lock.
///   `read_chunk` keeps it across the file read.
/// - Writers never hold the registry lock while calling into the engine.
pub struct ChunkStore {
    /// Store configuration
    config: Config,

    /// Allocation and compaction engine
    engine: StorageEngine,

    /// Chunk registry (internal RwLock)
    registry: RwLock<Registry>,

    /// Serializes write operations
    write_lock: ReentrantMutex<()>,
}

impl ChunkStore {
    /// Open or create the store file named by `config.path`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let file = DiskFile::open(&config.path, config.read_only)?;
        Self::with_file(Arc::new(file), config)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified file
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().path(path).build();
        Self::open(config)
    }

    /// Empty store backed by memory
    pub fn in_memory() -> Result<Self> {
        Self::with_file(Arc::new(MemoryFile::new()), Config::default())
    }

    /// Open or create a store over an existing file handle
    ///
    /// On startup:
    /// 1. Empty file: write an initial store header
    /// 2. Otherwise: pick the newest valid store header
    /// 3. Read and validate the root chunk, decode the registry
    /// 4. Mark the root and every registered chunk as used
    pub fn with_file(file: Arc<dyn StoreFile>, config: Config) -> Result<Self> {
        config.validate()?;
        let engine = StorageEngine::new(file, &config);

        // Step 1: Fresh file
        if engine.size() == 0 {
            if engine.is_read_only() {
                return Err(VaultError::ReadOnly);
            }
            engine.write_fully(0, &StoreHeader::empty().encode())?;
            engine.sync()?;
            info!(path = %config.path.display(), "created new store");
            return Ok(Self::assemble(config, engine, Registry::new()));
        }

        // Step 2: Store header
        let header_len = STORE_HEADER_BLOCKS * BLOCK_SIZE;
        if engine.size() < header_len {
            return Err(VaultError::Corruption(format!(
                "File of {} bytes is shorter than the store header",
                engine.size()
            )));
        }
        let header = StoreHeader::decode(&engine.read_fully(0, header_len as usize)?)?;
        if !header.has_root() {
            info!(path = %config.path.display(), "opened empty store");
            return Ok(Self::assemble(config, engine, Registry::new()));
        }

        // Step 3: Root chunk and registry
        let mut root = Chunk::new(header.root_id, header.version);
        root.block = header.root_block;
        root.len = header.root_len;
        let buf = engine.read_fully(root.start_pos(), root.byte_len() as usize)?;
        let root_header = layout::validate(&buf, &root)?;
        root.version = root_header.version;
        root.next = root_header.next;
        root.max_len = u64::from(root_header.payload_len);
        root.max_len_live = root.max_len;
        let payload = &buf[HEADER_SIZE..HEADER_SIZE + root_header.payload_len as usize];
        let snapshot = RegistrySnapshot::from_bytes(payload)?;
        if snapshot.version != header.version {
            return Err(VaultError::Corruption(format!(
                "Root chunk holds version {} but the store header names {}",
                snapshot.version, header.version
            )));
        }

        // Step 4: Free-space map
        engine.mark_used(root.start_pos(), root.byte_len())?;
        for chunk in &snapshot.chunks {
            engine.mark_used(chunk.start_pos(), chunk.byte_len())?;
        }

        let registry = Registry::from_snapshot(snapshot, root);
        info!(
            path = %config.path.display(),
            version = registry.version,
            chunks = registry.chunks.len(),
            fill_rate = engine.fill_rate(),
            "recovered store"
        );
        Ok(Self::assemble(config, engine, registry))
    }

    fn assemble(config: Config, engine: StorageEngine, registry: Registry) -> Self {
        Self {
            config,
            engine,
            registry: RwLock::new(registry),
            write_lock: ReentrantMutex::new(()),
        }
    }

    // =========================================================================
    // Chunk Operations
    // =========================================================================

    /// Write `payload` as a new chunk.
    ///
    /// The chunk becomes durable with the next commit.
    pub fn write_chunk(&self, payload: &[u8]) -> Result<Chunk> {
        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        let (id, version) = {
            let mut registry = self.registry.write();
            (registry.allocate_id(), registry.version + 1)
        };
        let mut chunk = Chunk::new(id, version);
        chunk.max_len = payload.len() as u64;
        chunk.max_len_live = chunk.max_len;
        self.place(&mut chunk, payload)?;

        let mut registry = self.registry.write();
        registry.chunks.insert(chunk.id, chunk.clone());
        registry.dirty = true;
        debug!(chunk = %chunk, "wrote chunk");
        Ok(chunk)
    }

    /// Payload of chunk `id`, validated against its header and footer
    ///
    /// The registry read guard is held across the file read: moves and
    /// commits publish under the write guard, so the range cannot be freed
    /// or reused while it is being read.
    pub fn read_chunk(&self, id: u32) -> Result<Vec<u8>> {
        let registry = self.registry.read();
        let chunk = registry.get(id).ok_or(VaultError::ChunkNotFound(id))?;
        let buf = self
            .engine
            .read_fully(chunk.start_pos(), chunk.byte_len() as usize)?;
        let header = layout::validate(&buf, chunk)?;
        Ok(buf[HEADER_SIZE..HEADER_SIZE + header.payload_len as usize].to_vec())
    }

    /// Drop chunk `id`; its space is reused only after the next commit
    pub fn remove_chunk(&self, id: u32) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        let mut registry = self.registry.write();
        let chunk = registry
            .chunks
            .remove(&id)
            .ok_or(VaultError::ChunkNotFound(id))?;
        registry.pending_free.push(chunk);
        registry.dirty = true;
        Ok(())
    }

    /// Make every change since the last commit durable
    pub fn commit(&self) -> Result<u64> {
        let _write_guard = self.write_lock.lock();
        self.commit_locked()
    }

    fn commit_locked(&self) -> Result<u64> {
        self.ensure_writable()?;

        // Step 1: Snapshot the registry into a new root chunk
        let (mut root, snapshot) = {
            let mut registry = self.registry.write();
            let id = registry.allocate_id();
            let version = registry.version + 1;
            let snapshot = RegistrySnapshot {
                version,
                next_id: registry.next_id,
                chunks: registry.chunks.values().cloned().collect(),
            };
            (Chunk::new(id, version), snapshot)
        };
        let payload = snapshot.to_bytes()?;
        root.max_len = payload.len() as u64;
        root.max_len_live = root.max_len;

        // Step 2: Root chunk must be durable before the header points at it
        self.place(&mut root, &payload)?;
        self.engine.sync()?;

        // Step 3: Store header
        let header = StoreHeader::for_root(snapshot.version, &root);
        self.engine.write_fully(0, &header.encode())?;
        self.engine.sync()?;

        // Step 4: Release superseded space
        let released = {
            let mut registry = self.registry.write();
            let mut released = std::mem::take(&mut registry.pending_free);
            released.extend(registry.root.replace(root.clone()));
            registry.version = snapshot.version;
            registry.dirty = false;
            released
        };
        for chunk in &released {
            self.engine.free(chunk.start_pos(), chunk.byte_len())?;
        }

        debug!(
            version = snapshot.version,
            root = %root,
            released = released.len(),
            "committed"
        );
        Ok(snapshot.version)
    }

    /// Frame `payload` into a pooled buffer, allocate space and write it
    fn place(&self, chunk: &mut Chunk, payload: &[u8]) -> Result<()> {
        chunk.len = Chunk::blocks_for(payload.len());
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            VaultError::InvariantViolation(format!(
                "Payload of {} bytes exceeds the chunk format limit",
                payload.len()
            ))
        })?;

        let mut buf = self.engine.acquire_write_buffer(chunk.byte_len() as usize);
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        layout::write_frame(&mut buf, chunk, payload_len);

        let placed = self
            .engine
            .allocate_chunk_space(chunk, &mut buf)
            .and_then(|()| {
                let written = self.engine.write_fully(chunk.start_pos(), &buf);
                if written.is_err() {
                    self.engine.free(chunk.start_pos(), chunk.byte_len())?;
                }
                written
            });
        self.engine.release_write_buffer(buf);
        placed
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Run one compaction pass if the file is less than `target_fill_rate`
    /// percent full. Returns whether any chunk was moved.
    pub fn compact(&self, target_fill_rate: u32, move_size: u64) -> Result<bool> {
        let _write_guard = self.write_lock.lock();
        if self.engine.is_read_only() {
            return Ok(false);
        }
        if matches!(self.engine.rewrite_candidates(), Some(ref c) if c.is_empty()) {
            debug!("space reuse disabled, skipping compaction");
            return Ok(false);
        }

        let (vacated, has_pending) = {
            let registry = self.registry.read();
            (registry.pending_blocks(), !registry.pending_free.is_empty())
        };
        let projected = self.engine.projected_fill_rate(vacated);
        if projected >= target_fill_rate {
            debug!(projected, target_fill_rate, "fill rate meets target");
            return Ok(false);
        }
        if has_pending {
            self.commit_locked()?;
        }
        self.engine.compact_move_chunks(move_size, self)
    }

    /// Compact repeatedly until nothing moves or the configured time limit
    /// passes. Returns whether anything was moved.
    pub fn compact_file(&self, target_fill_rate: u32, move_size: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(self.config.max_compact_time_ms);
        let mut moved_any = false;
        while self.compact(target_fill_rate, move_size)? {
            moved_any = true;
            if Instant::now() >= deadline {
                debug!("compaction time limit reached");
                break;
            }
        }
        Ok(moved_any)
    }

    /// Compact when the file is sparse or allocations keep missing holes
    pub fn maintain(&self) -> Result<bool> {
        if self.engine.is_read_only() {
            return Ok(false);
        }
        let fill_rate = self.engine.fill_rate();
        let fragmented = self.engine.is_fragmented();
        if fill_rate >= self.config.auto_compact_fill_rate && !fragmented {
            return Ok(false);
        }
        debug!(fill_rate, fragmented, "maintenance compaction");
        self.compact_file(self.config.auto_compact_fill_rate, self.config.compact_move_size)
    }

    /// Commit pending work, truncate reclaimable tail space and sync
    pub fn close(self) -> Result<()> {
        if self.engine.is_read_only() {
            return Ok(());
        }
        let _write_guard = self.write_lock.lock();
        if self.registry.read().dirty {
            self.commit_locked()?;
        }
        self.engine.shrink_if_possible(self.config.shrink_min_percent)?;
        self.engine.sync()?;
        info!(path = %self.config.path.display(), "closed store");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of registered data chunks
    pub fn chunk_count(&self) -> usize {
        self.registry.read().chunks.len()
    }

    /// Ids of registered data chunks in ascending order
    pub fn chunk_ids(&self) -> Vec<u32> {
        self.registry.read().chunks.keys().copied().collect()
    }

    pub fn version(&self) -> u64 {
        self.registry.read().version
    }

    pub fn fill_rate(&self) -> u32 {
        self.engine.fill_rate()
    }

    pub fn file_length_in_use(&self) -> u64 {
        self.engine.file_length_in_use()
    }

    pub fn file_size(&self) -> u64 {
        self.engine.size()
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.engine.is_read_only() {
            Err(VaultError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl ChunkPersistence for ChunkStore {
    fn chunks(&self) -> Vec<Chunk> {
        let registry = self.registry.read();
        registry
            .chunks
            .values()
            .chain(registry.root.iter())
            .cloned()
            .collect()
    }

    fn chunk(&self, id: u32) -> Option<Chunk> {
        self.registry.read().get(id).cloned()
    }

    fn register_chunk(&self, chunk: Chunk) -> Result<()> {
        let root_version = {
            let mut registry = self.registry.write();
            if registry.root.as_ref().is_some_and(|root| root.id == chunk.id) {
                registry.root = Some(chunk.clone());
                Some(registry.version)
            } else if let Some(entry) = registry.chunks.get_mut(&chunk.id) {
                *entry = chunk.clone();
                registry.dirty = true;
                None
            } else {
                warn!(chunk = %chunk, "moved chunk is not registered, ignoring");
                return Ok(());
            }
        };

        // The header must follow a moved root before its old copy is reused
        if let Some(version) = root_version {
            self.engine.sync()?;
            self.engine
                .write_fully(0, &StoreHeader::for_root(version, &chunk).encode())?;
            self.engine.sync()?;
            debug!(root = %chunk, "store header follows moved root");
        }
        Ok(())
    }

    fn store(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.commit_locked().map(|_| ())
    }

    fn last_chunk(&self) -> Option<Chunk> {
        self.registry.read().root.clone()
    }
}
