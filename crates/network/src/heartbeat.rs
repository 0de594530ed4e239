//! Heartbeat protocol.
//!
//! Probes every scheduled peer, drives the unreachable and no-connection
//! transitions from the silence since the last answer, and treats any
//! heartbeat request or reply as proof of life.

use peerlink_types::{Command, Message, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::concern::{Concern, Outbox, Priority, Reply, SendOutcome};
use crate::config::MeshConfig;
use crate::error::{NetworkError, Result};
use crate::peers::PeerTable;

pub const HEARTBEAT: Command = Command::new("HEARTBT");

#[derive(Debug)]
pub struct HeartbeatProtocol {
    peers: Arc<PeerTable>,
    config: MeshConfig,
}

impl HeartbeatProtocol {
    pub fn new(peers: Arc<PeerTable>, config: MeshConfig) -> Self {
        Self { peers, config }
    }

    /// Record that `message.source` is alive, directly or through the hop it
    /// arrived from.
    fn heard(&self, message: &Message, now: Duration) -> bool {
        let source = message.source;
        let base = self.config.heart_beat_interval;
        let relay = message
            .previous_hop
            .filter(|hop| *hop != source && self.peers.is_valid_remote(hop));

        let revived = self.peers.upsert_with(source, now, |peer| {
            let was_connected = peer.is_connected();
            match relay {
                Some(via) => peer.mark_heard_via(now, base, via),
                None => peer.mark_heard(now, base),
            }
            !was_connected && peer.is_connected()
        });

        match revived {
            Some(true) => {
                info!(peer = %source, "Peer connected");
                true
            }
            Some(false) => true,
            None => {
                warn!(source = %source, command = %message.command, "Heartbeat from invalid source dropped");
                false
            }
        }
    }

    fn compose(&self, to: PeerId, hop: Option<PeerId>, now: Duration) -> Message {
        let mut message = Message::request(
            self.peers.local_id(),
            to,
            HEARTBEAT,
            Vec::new(),
            now + self.config.default_ttl,
        );
        message.next_hop = hop;
        message
    }
}

impl Concern for HeartbeatProtocol {
    fn command(&self) -> Command {
        HEARTBEAT
    }

    fn execute(&self, now: Duration, outbox: &mut Outbox) -> Result<()> {
        let config = &self.config;
        let mut due = Vec::new();

        self.peers.for_each_mut(|peer| {
            if !peer.does_heart_beat || peer.next_heart_beat_time > now {
                return;
            }
            let silent = now.saturating_sub(peer.last_heart_beat_time);
            if silent > config.no_connection_threshold {
                if peer.mark_no_connection() {
                    info!(peer = %peer.id, silent_secs = silent.as_secs(), "Peer has no connection, heartbeats stopped");
                }
                return;
            }
            if silent > config.unresponsive_threshold && peer.mark_unreachable() {
                info!(peer = %peer.id, silent_secs = silent.as_secs(), "Peer unreachable");
            }
            peer.back_off(now, config.heart_beat_slow_down, config.heart_beat_max_interval);
            let hop = if peer.is_connected() { None } else { peer.via };
            due.push((peer.id, hop));
        });

        if !due.is_empty() {
            debug!(count = due.len(), "Sending heartbeats");
        }
        outbox.extend(
            Priority::Fast,
            due.into_iter().map(|(to, hop)| self.compose(to, hop, now)),
        );
        Ok(())
    }

    fn process_request(&self, message: &Message, now: Duration) -> Result<Reply> {
        if !self.heard(message, now) {
            return Ok(None);
        }
        let reply = Message::reply_to(
            message,
            self.peers.local_id(),
            Vec::new(),
            now + self.config.default_ttl,
        );
        Ok(Some((Priority::Fast, reply)))
    }

    fn process_reply(&self, message: &Message, now: Duration) -> Result<Reply> {
        self.heard(message, now);
        Ok(None)
    }

    /// The next probe is already scheduled, so failed heartbeats are not retried.
    fn send_failed(&self, message: Message, error: &NetworkError) -> SendOutcome {
        debug!(to = %message.to, error = %error, "Heartbeat not delivered");
        SendOutcome::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_types::PeerState;
    use uuid::Uuid;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn setup() -> (HeartbeatProtocol, Arc<PeerTable>) {
        let config = MeshConfig::default();
        let peers = Arc::new(PeerTable::new(Uuid::new_v4(), config.heart_beat_interval));
        (HeartbeatProtocol::new(peers.clone(), config), peers)
    }

    /// A connected peer last heard `silent` ago and due for a probe at `now`.
    fn due_peer(peers: &PeerTable, now: Duration, silent: Duration) -> PeerId {
        let id = Uuid::new_v4();
        peers.upsert_with(id, now, |peer| {
            peer.mark_heard(now - silent, secs(4));
            peer.next_heart_beat_time = now;
        });
        id
    }

    #[test]
    fn unresponsive_threshold_is_exclusive() {
        let (heartbeat, peers) = setup();
        let now = secs(1000);
        let fresh = due_peer(&peers, now, secs(39));
        let stale = due_peer(&peers, now, secs(41));
        let gone = due_peer(&peers, now, secs(241));

        let mut outbox = Outbox::new();
        heartbeat.execute(now, &mut outbox).unwrap();

        assert_eq!(peers.get(&fresh).unwrap().state(), PeerState::Connected);
        assert_eq!(peers.get(&stale).unwrap().state(), PeerState::Unreachable);
        let gone = peers.get(&gone).unwrap();
        assert_eq!(gone.state(), PeerState::NoConnection);
        assert!(!gone.does_heart_beat);

        let probed: Vec<PeerId> = outbox.fast.iter().map(|m| m.to).collect();
        assert_eq!(probed.len(), 2);
        assert!(!probed.contains(&gone.id));
    }

    #[test]
    fn probes_back_off_and_use_via() {
        let (heartbeat, peers) = setup();
        let (target, relay) = (Uuid::new_v4(), Uuid::new_v4());
        peers.upsert_with(target, secs(0), |peer| peer.set_via(relay));

        let mut outbox = Outbox::new();
        heartbeat.execute(secs(0), &mut outbox).unwrap();
        assert_eq!(outbox.fast.len(), 1);
        assert_eq!(outbox.fast[0].hop(), relay);
        assert_eq!(outbox.fast[0].time_to_live, secs(30));
        assert_eq!(peers.get(&target).unwrap().next_heart_beat_time, secs(6));

        let mut outbox = Outbox::new();
        heartbeat.execute(secs(5), &mut outbox).unwrap();
        assert!(outbox.is_empty(), "not due yet");
    }

    #[test]
    fn request_creates_peer_and_replies_fast() {
        let (heartbeat, peers) = setup();
        let remote = Uuid::new_v4();
        let mut request = Message::request(remote, peers.local_id(), HEARTBEAT, vec![], secs(30));
        request.previous_hop = Some(remote);

        let (priority, reply) = heartbeat.process_request(&request, secs(3)).unwrap().unwrap();
        assert_eq!(priority, Priority::Fast);
        assert!(reply.is_reply);
        assert_eq!(reply.to, remote);
        assert_eq!(reply.hop(), remote);

        let peer = peers.get(&remote).unwrap();
        assert_eq!(peer.state(), PeerState::Connected);
        assert_eq!(peer.last_heart_beat_time, secs(3));
    }

    #[test]
    fn relayed_reply_records_via() {
        let (heartbeat, peers) = setup();
        let (remote, relay) = (Uuid::new_v4(), Uuid::new_v4());
        let mut reply = Message::request(remote, peers.local_id(), HEARTBEAT, vec![], secs(30));
        reply.is_reply = true;
        reply.previous_hop = Some(relay);

        assert!(heartbeat.process_reply(&reply, secs(1)).unwrap().is_none());
        let peer = peers.get(&remote).unwrap();
        assert_eq!(peer.state(), PeerState::Routed);
        assert_eq!(peer.via, Some(relay));
    }

    #[test]
    fn invalid_source_gets_no_reply() {
        let (heartbeat, peers) = setup();
        let request = Message::request(Uuid::nil(), peers.local_id(), HEARTBEAT, vec![], secs(30));
        assert!(heartbeat.process_request(&request, secs(0)).unwrap().is_none());
        assert!(peers.is_empty());
    }
}
