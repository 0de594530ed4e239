//! Peer directory persistence.
//!
//! The mesh keeps its peer table in memory and synchronises it with a
//! [`PeerStore`] at a capped rate. Two backends are provided: [`SledPeerStore`]
//! for nodes with a data directory and [`MemoryPeerStore`] for tests and
//! ephemeral instances.

use parking_lot::RwLock;
use peerlink_types::{Peer, PeerId};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable peer directory.
pub trait PeerStore: Send + Sync {
    /// Every stored peer.
    fn load_peers(&self) -> Result<Vec<Peer>>;
    /// Insert or update a peer. Returns its persistence id, assigning one on
    /// first save.
    fn save_peer(&self, peer: &Peer) -> Result<u64>;
    /// Remove a peer. Returns whether it was present.
    fn remove_peer(&self, id: &PeerId) -> Result<bool>;
}

/// Sled-backed implementation
pub struct SledPeerStore {
    db: Db,
    peers: Tree,
}

impl SledPeerStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let peers = db.open_tree("peers")?;
        Ok(Self { db, peers })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl PeerStore for SledPeerStore {
    fn load_peers(&self) -> Result<Vec<Peer>> {
        let mut out = Vec::with_capacity(self.peers.len());
        for entry in self.peers.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice::<Peer>(&value) {
                Ok(peer) => out.push(peer),
                Err(err) => {
                    tracing::warn!(key = ?key, error = %err, "Skipping unreadable peer record");
                }
            }
        }
        Ok(out)
    }

    fn save_peer(&self, peer: &Peer) -> Result<u64> {
        let db_id = match peer.db_id {
            Some(id) => id,
            None => self.db.generate_id()?,
        };
        let mut record = peer.clone();
        record.db_id = Some(db_id);
        self.peers
            .insert(peer.id.as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(db_id)
    }

    fn remove_peer(&self, id: &PeerId) -> Result<bool> {
        Ok(self.peers.remove(id.as_bytes())?.is_some())
    }
}

/// In-memory testing backend
#[derive(Default)]
pub struct MemoryPeerStore {
    peers: RwLock<HashMap<PeerId, Peer>>,
    next_id: AtomicU64,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().get(id).cloned()
    }
}

impl PeerStore for MemoryPeerStore {
    fn load_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.peers.read().values().cloned().collect())
    }

    fn save_peer(&self, peer: &Peer) -> Result<u64> {
        let db_id = peer
            .db_id
            .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut record = peer.clone();
        record.db_id = Some(db_id);
        record.dirty = false;
        self.peers.write().insert(peer.id, record);
        Ok(db_id)
    }

    fn remove_peer(&self, id: &PeerId) -> Result<bool> {
        Ok(self.peers.write().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample_peer() -> Peer {
        Peer::new(Uuid::new_v4(), Duration::from_secs(1), Duration::from_secs(4))
            .with_address("127.0.0.1", 9000)
    }

    #[test]
    fn sled_store_assigns_ids_and_reloads() {
        let dir = tempdir().unwrap();
        let peer = sample_peer();
        let id = {
            let store = SledPeerStore::new(dir.path()).unwrap();
            let id = store.save_peer(&peer).unwrap();
            let mut updated = peer.clone();
            updated.db_id = Some(id);
            updated.port = Some(9001);
            assert_eq!(store.save_peer(&updated).unwrap(), id);
            store.flush().unwrap();
            id
        };

        let store = SledPeerStore::new(dir.path()).unwrap();
        let peers = store.load_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, peer.id);
        assert_eq!(peers[0].db_id, Some(id));
        assert_eq!(peers[0].port, Some(9001));

        assert!(store.remove_peer(&peer.id).unwrap());
        assert!(!store.remove_peer(&peer.id).unwrap());
        assert!(store.load_peers().unwrap().is_empty());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryPeerStore::new();
        let peer = sample_peer();
        let first = store.save_peer(&peer).unwrap();
        let other = store.save_peer(&sample_peer()).unwrap();
        assert_ne!(first, other);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&peer.id).unwrap().db_id, Some(first));
        assert!(store.remove_peer(&peer.id).unwrap());
        assert_eq!(store.len(), 1);
    }
}
