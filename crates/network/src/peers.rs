//! Peer table: the single shared registry of known peers.
//!
//! Every read and write goes through one mutex. Callers receive cloned
//! snapshots or run a closure under the lock; the lock is never held across
//! transport I/O.

use parking_lot::Mutex;
use peerlink_types::{Peer, PeerId, PeerState};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct PeerTable {
    local: PeerId,
    base_interval: Duration,
    peers: Mutex<HashMap<PeerId, Peer>>,
}

impl PeerTable {
    /// `base_interval` is the heartbeat interval given to newly created peers.
    pub fn new(local: PeerId, base_interval: Duration) -> Self {
        Self {
            local,
            base_interval,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Ids that can never name a remote peer.
    pub fn is_valid_remote(&self, id: &PeerId) -> bool {
        !id.is_nil() && *id != self.local
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.lock().contains_key(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.lock().get(id).cloned()
    }

    /// Insert or replace a peer record.
    pub fn upsert(&self, peer: Peer) {
        if !self.is_valid_remote(&peer.id) {
            return;
        }
        self.peers.lock().insert(peer.id, peer);
    }

    /// Run `f` on an existing peer. Returns `None` when the peer is unknown.
    pub fn update<R>(&self, id: &PeerId, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.peers.lock().get_mut(id).map(f)
    }

    /// Run `f` on a peer, creating it in the initial state first if needed.
    /// Returns `None` when `id` is nil or the local instance.
    pub fn upsert_with<R>(
        &self,
        id: PeerId,
        now: Duration,
        f: impl FnOnce(&mut Peer) -> R,
    ) -> Option<R> {
        if !self.is_valid_remote(&id) {
            return None;
        }
        let mut peers = self.peers.lock();
        let peer = peers.entry(id).or_insert_with(|| {
            debug!(peer = %id, "Adding peer to table");
            Peer::new(id, now, self.base_interval)
        });
        Some(f(peer))
    }

    /// Run `f` over every peer while holding the lock.
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut Peer)) {
        let mut peers = self.peers.lock();
        for peer in peers.values_mut() {
            f(peer);
        }
    }

    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers.lock().values().cloned().collect()
    }

    /// Read-only snapshot of peers in `state`.
    pub fn peers_in_state(&self, state: PeerState) -> Vec<Peer> {
        self.peers
            .lock()
            .values()
            .filter(|peer| peer.state() == state)
            .cloned()
            .collect()
    }

    pub fn connected_ids(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .values()
            .filter(|peer| peer.is_connected())
            .map(|peer| peer.id)
            .collect()
    }

    /// Snapshot of changed peers, clearing their dirty flags.
    pub fn take_dirty(&self) -> Vec<Peer> {
        let mut peers = self.peers.lock();
        peers
            .values_mut()
            .filter(|peer| peer.dirty)
            .map(|peer| {
                peer.dirty = false;
                peer.clone()
            })
            .collect()
    }

    /// Mark a peer dirty again after a failed save.
    pub fn mark_dirty(&self, id: &PeerId) {
        if let Some(peer) = self.peers.lock().get_mut(id) {
            peer.dirty = true;
        }
    }

    pub fn set_db_id(&self, id: &PeerId, db_id: u64) {
        if let Some(peer) = self.peers.lock().get_mut(id) {
            peer.db_id = Some(db_id);
        }
    }

    /// Adopt stored peers the table does not know yet, restarting their
    /// liveness at `now`. Returns how many were added.
    pub fn merge_stored<I: IntoIterator<Item = Peer>>(&self, stored: I, now: Duration) -> usize {
        let mut peers = self.peers.lock();
        let mut added = 0;
        for mut peer in stored {
            if !self.is_valid_remote(&peer.id) || peers.contains_key(&peer.id) {
                continue;
            }
            peer.restore(now, self.base_interval);
            peers.insert(peer.id, peer);
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn table() -> PeerTable {
        PeerTable::new(Uuid::new_v4(), Duration::from_secs(4))
    }

    #[test]
    fn upsert_with_creates_initial_peer() {
        let table = table();
        let id = Uuid::new_v4();
        let state = table.upsert_with(id, Duration::from_secs(7), |peer| peer.state());
        assert_eq!(state, Some(PeerState::Initial));
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.last_heart_beat_time, Duration::from_secs(7));
        assert_eq!(peer.heart_beat_interval, Duration::from_secs(4));
    }

    #[test]
    fn local_and_nil_ids_are_rejected() {
        let table = table();
        let local = table.local_id();
        assert!(table.upsert_with(local, Duration::ZERO, |_| ()).is_none());
        assert!(table.upsert_with(Uuid::nil(), Duration::ZERO, |_| ()).is_none());
        table.upsert(Peer::new(local, Duration::ZERO, Duration::from_secs(4)));
        assert!(table.is_empty());
    }

    #[test]
    fn state_views_are_snapshots() {
        let table = table();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        table.upsert_with(a, Duration::ZERO, |peer| peer.mark_heard(Duration::ZERO, Duration::from_secs(4)));
        table.upsert_with(b, Duration::ZERO, |_| ());

        let connected = table.peers_in_state(PeerState::Connected);
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, a);
        assert_eq!(table.peers_in_state(PeerState::Initial).len(), 1);
        assert_eq!(table.connected_ids(), vec![a]);

        // the snapshot is detached from the table
        table.update(&a, |peer| peer.mark_unreachable());
        assert!(connected[0].is_connected());
    }

    #[test]
    fn dirty_tracking_and_merge() {
        let table = table();
        let id = Uuid::new_v4();
        table.upsert_with(id, Duration::ZERO, |_| ());
        assert_eq!(table.take_dirty().len(), 1);
        assert!(table.take_dirty().is_empty());
        table.mark_dirty(&id);
        assert_eq!(table.take_dirty().len(), 1);

        let mut stored = Peer::new(Uuid::new_v4(), Duration::ZERO, Duration::from_secs(4));
        stored.mark_heard(Duration::from_secs(1), Duration::from_secs(9));
        let duplicate = Peer::new(id, Duration::ZERO, Duration::from_secs(4));
        assert_eq!(table.merge_stored(vec![stored.clone(), duplicate], Duration::from_secs(60)), 1);
        assert_eq!(table.len(), 2);
        assert!(table.take_dirty().is_empty());

        let adopted = table.get(&stored.id).unwrap();
        assert_eq!(adopted.state(), PeerState::Initial);
        assert_eq!(adopted.next_heart_beat_time, Duration::from_secs(60));
        assert_eq!(adopted.heart_beat_interval, Duration::from_secs(4));
    }
}
