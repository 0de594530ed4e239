//! Ask-around path discovery.
//!
//! When the router has no path to a peer it asks the hops a message came
//! through (or every neighbour) whether they can reach it. Anyone directly
//! connected to the wanted peer answers, and the answer becomes a `via` hint.

use parking_lot::Mutex;
use peerlink_types::{Command, Message, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::concern::{Concern, Outbox, Priority, Reply, SendOutcome};
use crate::config::MeshConfig;
use crate::error::{NetworkError, Result};
use crate::peers::PeerTable;
use crate::router::Discovery;

pub const ASK_AROUND: Command = Command::new("ASKARND");

/// Payload of both the question and the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskAround {
    pub wanted: PeerId,
}

impl AskAround {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}

#[derive(Debug)]
pub struct AskAroundProtocol {
    peers: Arc<PeerTable>,
    ask_around_interval: Duration,
    default_ttl: Duration,
    /// Last time each wanted peer was asked for.
    last_asked: Mutex<HashMap<PeerId, Duration>>,
}

impl AskAroundProtocol {
    pub fn new(peers: Arc<PeerTable>, config: &MeshConfig) -> Self {
        Self {
            peers,
            ask_around_interval: config.ask_around_interval,
            default_ttl: config.default_ttl,
            last_asked: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the right to ask for `wanted` at `now`.
    fn claim(&self, wanted: PeerId, now: Duration) -> bool {
        let mut last_asked = self.last_asked.lock();
        match last_asked.get(&wanted) {
            Some(at) if now < *at + self.ask_around_interval => false,
            _ => {
                last_asked.insert(wanted, now);
                true
            }
        }
    }

    /// Hop to use for a neighbour we may only know through a proxy.
    fn hop_towards(&self, target: &PeerId) -> Option<PeerId> {
        self.peers
            .get(target)
            .filter(|peer| !peer.is_connected())
            .and_then(|peer| peer.via)
    }
}

impl Discovery for AskAroundProtocol {
    fn ask_around(&self, targets: &[PeerId], wanted: PeerId, now: Duration) -> Vec<Message> {
        if targets.is_empty() || !self.claim(wanted, now) {
            return Vec::new();
        }
        let payload = match (AskAround { wanted }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Failed to encode ask-around request");
                return Vec::new();
            }
        };

        let local = self.peers.local_id();
        let mut requests: Vec<Message> = Vec::with_capacity(targets.len());
        for target in targets {
            if requests.iter().any(|m| m.to == *target) {
                continue;
            }
            let mut request = Message::request(local, *target, ASK_AROUND, payload.clone(), now + self.default_ttl);
            request.next_hop = self.hop_towards(target);
            requests.push(request);
        }
        debug!(wanted = %wanted, targets = requests.len(), "Asking around");
        requests
    }
}

impl Concern for AskAroundProtocol {
    fn command(&self) -> Command {
        ASK_AROUND
    }

    /// Forget old claims so the map stays bounded by recent demand.
    fn execute(&self, now: Duration, _outbox: &mut Outbox) -> Result<()> {
        let interval = self.ask_around_interval;
        self.last_asked
            .lock()
            .retain(|_, at| now < *at + interval);
        Ok(())
    }

    fn process_request(&self, message: &Message, now: Duration) -> Result<Reply> {
        let question = AskAround::decode(&message.payload)?;
        let local = self.peers.local_id();
        let reachable = question.wanted == local
            || self
                .peers
                .get(&question.wanted)
                .map(|peer| peer.is_connected())
                .unwrap_or(false);
        if !reachable {
            return Ok(None);
        }
        let reply = Message::reply_to(message, local, question.encode()?, now + self.default_ttl);
        Ok(Some((Priority::Medium, reply)))
    }

    fn process_reply(&self, message: &Message, now: Duration) -> Result<Reply> {
        let answer = AskAround::decode(&message.payload)?;
        if !self.peers.is_valid_remote(&answer.wanted) {
            return Ok(None);
        }
        let replier_is_neighbour = self
            .peers
            .get(&message.source)
            .map(|peer| peer.is_connected())
            .unwrap_or(false);
        let via = if replier_is_neighbour {
            message.source
        } else {
            message.previous_hop.unwrap_or(message.source)
        };
        if !self.peers.is_valid_remote(&via) {
            return Err(NetworkError::Concern(format!("unusable via {} for {}", via, answer.wanted)));
        }

        self.peers.upsert_with(answer.wanted, now, |peer| peer.set_via(via));
        info!(peer = %answer.wanted, via = %via, "Learned path to peer");
        Ok(None)
    }

    fn send_failed(&self, message: Message, error: &NetworkError) -> SendOutcome {
        debug!(to = %message.to, error = %error, "Ask-around request not delivered");
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

    fn setup() -> (AskAroundProtocol, Arc<PeerTable>) {
        let config = MeshConfig::default();
        let peers = Arc::new(PeerTable::new(Uuid::new_v4(), config.heart_beat_interval));
        (AskAroundProtocol::new(peers.clone(), &config), peers)
    }

    #[test]
    fn requests_are_rate_limited_per_wanted_peer() {
        let (ask, _) = setup();
        let (a, b, wanted) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let requests = ask.ask_around(&[a, b, a], wanted, secs(0));
        assert_eq!(requests.len(), 2);
        assert_eq!(AskAround::decode(&requests[0].payload).unwrap().wanted, wanted);

        assert!(ask.ask_around(&[a], wanted, secs(59)).is_empty());
        assert_eq!(ask.ask_around(&[a], Uuid::new_v4(), secs(59)).len(), 1);
        assert_eq!(ask.ask_around(&[a], wanted, secs(60)).len(), 1);
    }

    #[test]
    fn expired_claims_are_pruned() {
        let (ask, _) = setup();
        ask.ask_around(&[Uuid::new_v4()], Uuid::new_v4(), secs(0));
        ask.execute(secs(61), &mut Outbox::new()).unwrap();
        assert!(ask.last_asked.lock().is_empty());
    }

    #[test]
    fn answers_only_for_connected_peers() {
        let (ask, peers) = setup();
        let (asker, wanted) = (Uuid::new_v4(), Uuid::new_v4());
        let payload = AskAround { wanted }.encode().unwrap();
        let mut question = Message::request(asker, peers.local_id(), ASK_AROUND, payload, secs(30));
        question.previous_hop = Some(asker);

        assert!(ask.process_request(&question, secs(0)).unwrap().is_none());

        peers.upsert_with(wanted, secs(0), |peer| peer.mark_heard(secs(0), secs(4)));
        let (priority, reply) = ask.process_request(&question, secs(0)).unwrap().unwrap();
        assert_eq!(priority, Priority::Medium);
        assert_eq!(reply.to, asker);
        assert_eq!(AskAround::decode(&reply.payload).unwrap().wanted, wanted);
    }

    #[test]
    fn answer_sets_via_on_wanted_peer() {
        let (ask, peers) = setup();
        let (replier, wanted) = (Uuid::new_v4(), Uuid::new_v4());
        peers.upsert_with(replier, secs(0), |peer| peer.mark_heard(secs(0), secs(4)));

        let payload = AskAround { wanted }.encode().unwrap();
        let mut answer = Message::request(replier, peers.local_id(), ASK_AROUND, payload, secs(30));
        answer.is_reply = true;
        answer.previous_hop = Some(replier);

        ask.process_reply(&answer, secs(1)).unwrap();
        let peer = peers.get(&wanted).unwrap();
        assert_eq!(peer.via, Some(replier));
        assert_eq!(peer.state(), PeerState::Routed);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let (ask, peers) = setup();
        let question = Message::request(Uuid::new_v4(), peers.local_id(), ASK_AROUND, vec![1], secs(30));
        assert!(ask.process_request(&question, secs(0)).is_err());
    }
}
