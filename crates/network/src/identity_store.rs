//! Peer key lookup used before opening an authenticated link.

use parking_lot::RwLock;
use peerlink_types::{PeerId, PublicKey};
use std::collections::HashMap;

pub trait KeyStore: Send + Sync {
    fn lookup_public_key(&self, peer: &PeerId) -> Option<PublicKey>;
}

/// Key store backed by a map, filled by whoever manages certificates.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<PeerId, PublicKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerId, key: PublicKey) {
        self.keys.write().insert(peer, key);
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PublicKey> {
        self.keys.write().remove(peer)
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup_public_key(&self, peer: &PeerId) -> Option<PublicKey> {
        self.keys.read().get(peer).copied()
    }
}
