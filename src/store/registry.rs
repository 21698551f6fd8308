//! Chunk registry
//!
//! In-memory id → chunk map plus its serialized form, which is the payload
//! of every root chunk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::Result;

/// Durable image of the registry, stored as the root chunk payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RegistrySnapshot {
    pub version: u64,
    pub next_id: u32,
    pub chunks: Vec<Chunk>,
}

impl RegistrySnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Live registry state, guarded by the store's RwLock
#[derive(Debug)]
pub(crate) struct Registry {
    /// Data chunks by id
    pub chunks: BTreeMap<u32, Chunk>,

    /// Chunk holding the last committed snapshot
    pub root: Option<Chunk>,

    /// Removed chunks whose space is freed by the next commit
    pub pending_free: Vec<Chunk>,

    pub next_id: u32,

    /// Version of the last commit
    pub version: u64,

    /// Changes since the last commit
    pub dirty: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            root: None,
            pending_free: Vec::new(),
            next_id: 1,
            version: 0,
            dirty: false,
        }
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot, root: Chunk) -> Self {
        Self {
            chunks: snapshot.chunks.into_iter().map(|c| (c.id, c)).collect(),
            root: Some(root),
            pending_free: Vec::new(),
            next_id: snapshot.next_id,
            version: snapshot.version,
            dirty: false,
        }
    }

    pub fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Look up a data chunk or the root
    pub fn get(&self, id: u32) -> Option<&Chunk> {
        self.chunks
            .get(&id)
            .or_else(|| self.root.as_ref().filter(|root| root.id == id))
    }

    /// Blocks held by removed chunks awaiting commit
    pub fn pending_blocks(&self) -> u64 {
        self.pending_free.iter().map(|c| u64::from(c.len)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_serialization() {
        let mut chunk = Chunk::new(3, 2);
        chunk.block = 10;
        chunk.len = 2;
        chunk.collect_priority = 55;
        let snapshot = RegistrySnapshot {
            version: 2,
            next_id: 4,
            chunks: vec![chunk],
        };

        let decoded = RegistrySnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.version, 2);
        assert_eq!(decoded.next_id, 4);
        assert_eq!(decoded.chunks[0].block, 10);
        // Transient selection state is not persisted
        assert_eq!(decoded.chunks[0].collect_priority, 0);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let result = RegistrySnapshot::from_bytes(&[0xFF; 3]);
        assert!(matches!(result, Err(crate::VaultError::Serialization(_))));
    }

    #[test]
    fn test_get_finds_root() {
        let mut registry = Registry::new();
        let data = Chunk::new(registry.allocate_id(), 1);
        registry.chunks.insert(data.id, data);
        registry.root = Some(Chunk::new(registry.allocate_id(), 1));

        assert!(registry.get(1).is_some());
        assert_eq!(registry.get(2).map(|c| c.id), Some(2));
        assert!(registry.get(3).is_none());
    }
}
