use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::{Command, PeerId};

/// Routed message envelope.
///
/// `time_to_live` is an absolute deadline on the mesh clock. `handler` names
/// the concern that owns the message locally and is never put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub source: PeerId,
    pub to: PeerId,
    pub previous_hop: Option<PeerId>,
    pub next_hop: Option<PeerId>,
    pub command: Command,
    pub is_reply: bool,
    pub time_to_live: Duration,
    pub payload: Vec<u8>,
    #[serde(skip)]
    pub handler: Option<Command>,
}

impl Message {
    /// Create a request from `source` to `to`.
    pub fn request(
        source: PeerId,
        to: PeerId,
        command: Command,
        payload: Vec<u8>,
        time_to_live: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            to,
            previous_hop: None,
            next_hop: None,
            command,
            is_reply: false,
            time_to_live,
            payload,
            handler: Some(command),
        }
    }

    /// Create a reply to `request`, sent back along the hop it arrived on.
    pub fn reply_to(request: &Message, local: PeerId, payload: Vec<u8>, time_to_live: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: local,
            to: request.source,
            previous_hop: None,
            next_hop: request.previous_hop.filter(|hop| *hop != request.source),
            command: request.command,
            is_reply: true,
            time_to_live,
            payload,
            handler: Some(request.command),
        }
    }

    pub fn with_next_hop(mut self, hop: PeerId) -> Self {
        self.next_hop = Some(hop);
        self
    }

    /// Identity the transport should deliver this message to.
    pub fn hop(&self) -> PeerId {
        self.next_hop.unwrap_or(self.to)
    }

    /// True once the deadline has been reached at `now`.
    pub fn is_expired(&self, now: Duration) -> bool {
        self.time_to_live <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: Command = Command::new("ECHO");

    #[test]
    fn request_is_owned_by_its_command() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let msg = Message::request(a, b, ECHO, vec![1], Duration::from_secs(5));
        assert_eq!(msg.handler, Some(ECHO));
        assert_eq!(msg.hop(), b);
        assert!(!msg.is_reply);
        assert!(!msg.is_expired(Duration::from_secs(4)));
        assert!(msg.is_expired(Duration::from_secs(5)));
    }

    #[test]
    fn reply_returns_through_previous_hop() {
        let (a, b, relay) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut req = Message::request(a, b, ECHO, vec![], Duration::from_secs(5));
        req.previous_hop = Some(relay);
        let reply = Message::reply_to(&req, b, vec![9], Duration::from_secs(9));
        assert!(reply.is_reply);
        assert_eq!(reply.to, a);
        assert_eq!(reply.hop(), relay);

        req.previous_hop = Some(a);
        let direct = Message::reply_to(&req, b, vec![], Duration::from_secs(9));
        assert_eq!(direct.next_hop, None);
        assert_eq!(direct.hop(), a);
    }

    #[test]
    fn handler_is_not_serialized() {
        let msg = Message::request(Uuid::new_v4(), Uuid::new_v4(), ECHO, vec![1, 2], Duration::from_secs(1));
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.handler, None);
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.payload, msg.payload);
    }
}
