//! Next-hop resolution for messages addressed to other instances.
//!
//! Resolution order, first match wins: direct link, `via` proxy, default
//! route. Unresolved messages are requeued while their deadline allows,
//! with a discovery request each time, and dropped once it has passed.

use peerlink_types::{Message, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::concern::{Outbox, Priority};
use crate::inbox::Inbox;
use crate::metrics::NetworkMetrics;
use crate::peers::PeerTable;

/// Source of path-discovery requests for peers the router cannot resolve.
pub trait Discovery: Send + Sync {
    /// Compose requests asking `targets` for a path to `wanted`. May return
    /// nothing for a peer asked about recently; the router keeps requeueing
    /// the message until its deadline either way.
    fn ask_around(&self, targets: &[PeerId], wanted: PeerId, now: Duration) -> Vec<Message>;
}

pub type DropHook = Box<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// Next hop resolved.
    Forward(Message),
    /// Try again next tick; carries the discovery requests to send.
    Requeue(Message, Vec<Message>),
    /// Deadline passed without a path.
    Drop(Message),
    /// Addressed to this instance; should never have been routed.
    Reject(Message),
}

pub struct Router {
    peers: Arc<PeerTable>,
    discovery: Arc<dyn Discovery>,
    metrics: Arc<NetworkMetrics>,
    default_route: Option<PeerId>,
    route_cap: usize,
    on_drop: DropHook,
}

impl Router {
    pub fn new(
        peers: Arc<PeerTable>,
        discovery: Arc<dyn Discovery>,
        metrics: Arc<NetworkMetrics>,
        default_route: Option<PeerId>,
        route_cap: usize,
    ) -> Self {
        Self {
            peers,
            discovery,
            metrics,
            default_route,
            route_cap,
            on_drop: Box::new(|_| {}),
        }
    }

    /// Install a callback invoked for every message dropped unresolved.
    pub fn with_on_drop(mut self, hook: DropHook) -> Self {
        self.on_drop = hook;
        self
    }

    /// Route up to `route_cap` messages from the inbox. Resolved messages go
    /// to the medium bucket, discovery requests to the slow one, and
    /// unresolved messages back to the inbox for the next tick.
    pub fn run(&self, inbox: &Inbox, now: Duration, outbox: &mut Outbox) {
        let mut requeue = Vec::new();
        for message in inbox.take_routes(self.route_cap) {
            match self.route(message, now) {
                RouteDecision::Forward(message) => outbox.push(Priority::Medium, message),
                RouteDecision::Requeue(message, discovery) => {
                    outbox.extend(Priority::Slow, discovery);
                    requeue.push(message);
                }
                RouteDecision::Drop(_) | RouteDecision::Reject(_) => {}
            }
        }
        if !requeue.is_empty() {
            inbox.requeue_routes(requeue);
        }
    }

    /// Decide the next hop of one message.
    pub fn route(&self, mut message: Message, now: Duration) -> RouteDecision {
        let local = self.peers.local_id();
        if message.to == local {
            error!(id = %message.id, source = %message.source, "Message for the local instance reached the router");
            return RouteDecision::Reject(message);
        }

        let known = self.peers.get(&message.to);
        if let Some(peer) = &known {
            if peer.is_connected() {
                return self.forward(message, peer.id);
            }
            if let Some(via) = peer.via.filter(|via| *via != local) {
                return self.forward(message, via);
            }
        } else {
            self.peers.upsert_with(message.to, now, |_| ());
        }

        if let Some(route) = self.default_route.filter(|route| *route != local) {
            return self.forward(message, route);
        }

        if !message.is_expired(now) {
            let requests = self.discovery.ask_around(&self.discovery_targets(&message), message.to, now);
            self.metrics.record_discovery_requests(requests.len());
            debug!(id = %message.id, to = %message.to, requests = requests.len(), "No path yet, requeueing");
            message.next_hop = None;
            return RouteDecision::Requeue(message, requests);
        }

        warn!(id = %message.id, to = %message.to, command = %message.command, "Dropping unroutable message");
        self.metrics.record_route_drop();
        (self.on_drop)(&message);
        RouteDecision::Drop(message)
    }

    fn forward(&self, mut message: Message, hop: PeerId) -> RouteDecision {
        debug!(id = %message.id, to = %message.to, hop = %hop, "Routing message");
        message.next_hop = Some(hop);
        self.metrics.record_routed();
        RouteDecision::Forward(message)
    }

    /// Who to ask: the hops the message came from, else every connected peer.
    fn discovery_targets(&self, message: &Message) -> Vec<PeerId> {
        let usable = |id: &PeerId| self.peers.is_valid_remote(id) && *id != message.to;
        let mut targets: Vec<PeerId> = Vec::with_capacity(2);
        for id in message.previous_hop.into_iter().chain(Some(message.source)) {
            if usable(&id) && !targets.contains(&id) {
                targets.push(id);
            }
        }
        if targets.is_empty() {
            targets = self.peers.connected_ids().into_iter().filter(|id| usable(id)).collect();
        }
        targets
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("local", &self.peers.local_id())
            .field("default_route", &self.default_route)
            .field("route_cap", &self.route_cap)
            .finish()
    }
}
