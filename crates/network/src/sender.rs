//! Outbound loop.
//!
//! Each tick first opens links for messages waiting on a connection, then
//! sends from the fast, medium and slow queues in that order. A failed send
//! is handed to the owning concern, which decides between retry and drop.

use peerlink_types::{Message, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::codec::MessageCodec;
use crate::concern::{Concern, ConcernRegistry, Outbox, Priority, SendOutcome};
use crate::error::{NetworkError, Result};
use crate::identity_store::KeyStore;
use crate::metrics::NetworkMetrics;
use crate::peers::PeerTable;
use crate::queue::{FastQueue, MessageQueue, RegularQueue, SlowQueue};
use crate::service::LoopWorker;
use crate::transport::OutboundTransport;

/// Outbound queues, filled by the application loop and drained by the sender.
#[derive(Debug, Default)]
pub struct SendQueues {
    fast: FastQueue,
    medium: RegularQueue,
    slow: SlowQueue,
    /// Messages whose next hop has no link yet.
    connect: FastQueue,
}

impl SendQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, priority: Priority, message: Message) {
        self.queue(priority).enqueue(message);
    }

    /// Move every bucket of `outbox` into the matching queue.
    pub fn submit(&self, outbox: Outbox) {
        let Outbox { fast, medium, slow } = outbox;
        if !fast.is_empty() {
            self.fast.enqueue_many(fast);
        }
        if !medium.is_empty() {
            self.medium.enqueue_many(medium);
        }
        if !slow.is_empty() {
            self.slow.enqueue_many(slow);
        }
    }

    pub fn enqueue_connection(&self, message: Message) {
        self.connect.enqueue(message);
    }

    /// Messages waiting in any queue.
    pub fn pending(&self) -> usize {
        self.fast.len() + self.medium.len() + self.slow.len() + self.connect.len()
    }

    fn queue(&self, priority: Priority) -> &dyn MessageQueue {
        match priority {
            Priority::Fast => &self.fast,
            Priority::Medium => &self.medium,
            Priority::Slow => &self.slow,
        }
    }
}

pub struct Sender {
    local: PeerId,
    transport: Box<dyn OutboundTransport>,
    codec: Arc<dyn MessageCodec>,
    queues: Arc<SendQueues>,
    peers: Arc<PeerTable>,
    keys: Arc<dyn KeyStore>,
    registry: Arc<ConcernRegistry>,
    metrics: Arc<NetworkMetrics>,
    clock: Arc<dyn Clock>,
    idle: Duration,
}

impl Sender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Box<dyn OutboundTransport>,
        codec: Arc<dyn MessageCodec>,
        queues: Arc<SendQueues>,
        peers: Arc<PeerTable>,
        keys: Arc<dyn KeyStore>,
        registry: Arc<ConcernRegistry>,
        metrics: Arc<NetworkMetrics>,
        clock: Arc<dyn Clock>,
        idle: Duration,
    ) -> Self {
        Self {
            local: peers.local_id(),
            transport,
            codec,
            queues,
            peers,
            keys,
            registry,
            metrics,
            clock,
            idle,
        }
    }

    /// One sender pass at `now`.
    pub fn run_once(&self, now: Duration) {
        for message in self.queues.connect.dequeue() {
            self.connect(message);
        }
        for priority in [Priority::Fast, Priority::Medium, Priority::Slow] {
            for message in self.queues.queue(priority).dequeue() {
                self.deliver(priority, message, now);
            }
        }
    }

    fn connect(&self, message: Message) {
        let hop = message.hop();
        if self.transport.is_connected(&hop) {
            self.queues.fast.enqueue(message);
            return;
        }
        match self.open(&hop) {
            Ok(()) => {
                self.metrics.record_connection_opened();
                debug!(peer = %hop, "Connection opened");
                self.queues.fast.enqueue(message);
            }
            Err(e) => {
                self.metrics.record_connection_failed();
                warn!(peer = %hop, id = %message.id, error = %e, "Failed to connect");
                // the message is not queued again whatever the handler says
                if let Some(concern) = self.handler(&message) {
                    let outcome = concern.send_failed(message, &e);
                    debug!(peer = %hop, ?outcome, "Connection failure reported to handler");
                }
            }
        }
    }

    fn open(&self, peer: &PeerId) -> Result<()> {
        let record = self.peers.get(peer).ok_or(NetworkError::UnknownPeer(*peer))?;
        let address = record.address().ok_or(NetworkError::NoAddress(*peer))?;
        let key = self
            .keys
            .lookup_public_key(peer)
            .ok_or(NetworkError::MissingKey(*peer))?;
        self.transport.set_peer_key(peer, key);
        self.transport.connect(peer, &address)?;
        Ok(())
    }

    fn deliver(&self, priority: Priority, mut message: Message, now: Duration) {
        let hop = message.hop();
        if !self.transport.is_connected(&hop) {
            self.queues.enqueue_connection(message);
            return;
        }

        message.previous_hop = Some(self.local);
        let frame = match self.codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Failed to encode message, dropping");
                self.drop_message(&message);
                return;
            }
        };

        match self.transport.send(&hop, &frame) {
            Ok(()) => {
                self.metrics.record_message_sent(frame.len());
                debug!(id = %message.id, hop = %hop, command = %message.command, "Message sent");
                if let Some(concern) = self.handler(&message) {
                    concern.message_sent(&message);
                }
            }
            Err(e) => {
                self.metrics.record_send_failure();
                self.send_failed(priority, message, e.into(), now);
            }
        }
    }

    fn send_failed(&self, priority: Priority, message: Message, error: NetworkError, now: Duration) {
        if message.is_expired(now) {
            debug!(id = %message.id, to = %message.to, error = %error, "Send failed after deadline, dropping");
            self.drop_message(&message);
            return;
        }

        let id = message.id;
        let outcome = match self.handler(&message) {
            Some(concern) => concern.send_failed(message, &error),
            None => SendOutcome::Retry(message),
        };
        match outcome {
            SendOutcome::Retry(message) => {
                self.metrics.record_retry();
                debug!(id = %message.id, error = %error, "Send failed, retrying");
                self.queues.enqueue(priority, message);
            }
            SendOutcome::Sent => debug!(id = %id, "Handler reported the message as delivered"),
            SendOutcome::Dropped => {
                self.metrics.record_message_dropped();
                debug!(id = %id, error = %error, "Handler dropped the message");
            }
        }
    }

    fn drop_message(&self, message: &Message) {
        self.metrics.record_message_dropped();
        if let Some(concern) = self.handler(message) {
            concern.message_dropped(message);
        }
    }

    fn handler(&self, message: &Message) -> Option<Arc<dyn Concern>> {
        self.registry.handler_for(message).cloned()
    }
}

impl LoopWorker for Sender {
    fn name(&self) -> &'static str {
        "peerlink-sender"
    }

    fn tick(&mut self) -> Result<()> {
        self.run_once(self.clock.now());
        Ok(())
    }

    fn idle(&self) -> Duration {
        self.idle
    }
}
