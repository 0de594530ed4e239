use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::PeerId;

/// Direct-link liveness of a peer as observed by the heartbeat protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liveness {
    /// Known but never heard from.
    Initial,
    /// Answered a heartbeat recently.
    Connected,
    /// Silent for longer than the unresponsive threshold.
    Unreachable,
    /// Silent for longer than the no-connection threshold; no longer probed.
    NoConnection,
}

/// Summary state of a peer, combining liveness with the routed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Initial,
    Connected,
    Routed,
    Unreachable,
    NoConnection,
}

/// A known peer and its heartbeat bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Proxy peer used when there is no direct link.
    pub via: Option<PeerId>,
    pub liveness: Liveness,
    /// Reachable only through `via`. Independent of the unreachable and
    /// no-connection liveness values.
    pub routed: bool,
    pub last_heart_beat_time: Duration,
    pub next_heart_beat_time: Duration,
    /// Current probe interval, grown by the slow-down step while unanswered.
    pub heart_beat_interval: Duration,
    pub does_heart_beat: bool,
    /// Identifier assigned by the persistence layer.
    pub db_id: Option<u64>,
    #[serde(skip)]
    pub dirty: bool,
}

impl Peer {
    /// A freshly mentioned peer, first probed at `now`.
    pub fn new(id: PeerId, now: Duration, interval: Duration) -> Self {
        Self {
            id,
            host: None,
            port: None,
            via: None,
            liveness: Liveness::Initial,
            routed: false,
            last_heart_beat_time: now,
            next_heart_beat_time: now,
            heart_beat_interval: interval,
            does_heart_beat: true,
            db_id: None,
            dirty: true,
        }
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// `host:port`, when both are known.
    pub fn address(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.liveness == Liveness::Connected
    }

    pub fn state(&self) -> PeerState {
        match self.liveness {
            Liveness::Connected => PeerState::Connected,
            Liveness::NoConnection => PeerState::NoConnection,
            Liveness::Unreachable => PeerState::Unreachable,
            Liveness::Initial if self.routed => PeerState::Routed,
            Liveness::Initial => PeerState::Initial,
        }
    }

    /// Any heartbeat answer: back to connected and probing at the base interval.
    pub fn mark_heard(&mut self, now: Duration, base_interval: Duration) {
        self.liveness = Liveness::Connected;
        self.routed = false;
        self.last_heart_beat_time = now;
        self.heart_beat_interval = base_interval;
        self.next_heart_beat_time = now + base_interval;
        self.does_heart_beat = true;
        self.dirty = true;
    }

    /// A heartbeat relayed through `via`: the peer is alive but only reachable
    /// through the proxy unless it already has a direct link.
    pub fn mark_heard_via(&mut self, now: Duration, base_interval: Duration, via: PeerId) {
        if !self.is_connected() {
            self.liveness = Liveness::Initial;
        }
        self.last_heart_beat_time = now;
        self.heart_beat_interval = base_interval;
        self.next_heart_beat_time = now + base_interval;
        self.does_heart_beat = true;
        self.set_via(via);
        self.dirty = true;
    }

    /// Reset the liveness bookkeeping of a peer loaded from storage. Saved
    /// timestamps belong to an earlier run, so the peer starts over as initial
    /// and is probed at `now`.
    pub fn restore(&mut self, now: Duration, base_interval: Duration) {
        self.liveness = Liveness::Initial;
        self.routed = self.via.is_some();
        self.last_heart_beat_time = now;
        self.next_heart_beat_time = now;
        self.heart_beat_interval = base_interval;
        self.does_heart_beat = true;
        self.dirty = false;
    }

    /// Connected peers that stop answering become unreachable.
    pub fn mark_unreachable(&mut self) -> bool {
        if self.liveness != Liveness::Connected {
            return false;
        }
        self.liveness = Liveness::Unreachable;
        self.routed = self.via.is_some();
        self.dirty = true;
        true
    }

    /// Terminal for probing: the peer is no longer scheduled.
    pub fn mark_no_connection(&mut self) -> bool {
        if self.liveness == Liveness::NoConnection {
            return false;
        }
        self.liveness = Liveness::NoConnection;
        self.does_heart_beat = false;
        self.routed = self.via.is_some();
        self.dirty = true;
        true
    }

    /// Record a proxy; the peer is routed unless it has a direct link.
    pub fn set_via(&mut self, via: PeerId) {
        if via == self.id {
            return;
        }
        self.via = Some(via);
        self.routed = !self.is_connected();
        self.dirty = true;
    }

    /// Schedule the next probe, growing the interval by `slow_down` up to `max`.
    pub fn back_off(&mut self, now: Duration, slow_down: Duration, max: Duration) {
        self.heart_beat_interval = (self.heart_beat_interval + slow_down).min(max);
        self.next_heart_beat_time = now + self.heart_beat_interval;
        self.dirty = true;
    }
}
