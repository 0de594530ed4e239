//! Inbound loop: reads frames, decodes and classifies them into the inbox.

use peerlink_types::{PeerId, PublicKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::codec::MessageCodec;
use crate::error::{Result, TransportError};
use crate::inbox::{InboundBatch, Inbox};
use crate::metrics::NetworkMetrics;
use crate::service::{LoopControl, LoopWorker};
use crate::transport::InboundTransport;

pub struct Receiver {
    local: PeerId,
    transport: Box<dyn InboundTransport>,
    codec: Arc<dyn MessageCodec>,
    inbox: Arc<Inbox>,
    /// Woken when a batch is published.
    app: Arc<LoopControl>,
    metrics: Arc<NetworkMetrics>,
    server_key: Option<PublicKey>,
    receive_cap: usize,
    poll_timeout: Duration,
}

impl Receiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: PeerId,
        transport: Box<dyn InboundTransport>,
        codec: Arc<dyn MessageCodec>,
        inbox: Arc<Inbox>,
        app: Arc<LoopControl>,
        metrics: Arc<NetworkMetrics>,
        receive_cap: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            local,
            transport,
            codec,
            inbox,
            app,
            metrics,
            server_key: None,
            receive_cap,
            poll_timeout,
        }
    }

    pub fn with_server_key(mut self, key: PublicKey) -> Self {
        self.server_key = Some(key);
        self
    }

    /// Wait for frames and publish up to `receive_cap` of them. Returns how
    /// many messages were published.
    pub fn run_once(&self) -> Result<usize> {
        match self.transport.poll(self.poll_timeout) {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
            Err(e) => {
                warn!(error = %e, "Transport poll failed");
                return Ok(0);
            }
        }

        let mut batch = InboundBatch::default();
        for _ in 0..self.receive_cap {
            let frame = match self.transport.recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(e) => {
                    warn!(error = %e, "Transport receive failed");
                    break;
                }
            };
            self.metrics.record_message_received(frame.len());

            let message = match self.codec.decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    self.metrics.record_decode_error();
                    warn!(error = %e, len = frame.len(), "Discarding undecodable frame");
                    continue;
                }
            };
            debug!(id = %message.id, source = %message.source, command = %message.command, "Message received");

            if message.to != self.local {
                batch.routes.push(message);
            } else if message.is_reply {
                batch.replies.push(message);
            } else {
                batch.requests.push(message);
            }
        }

        let published = batch.len();
        if published > 0 {
            self.inbox.publish(batch);
            self.app.wake();
        }
        Ok(published)
    }
}

impl LoopWorker for Receiver {
    fn name(&self) -> &'static str {
        "peerlink-receiver"
    }

    fn on_start(&mut self) -> Result<()> {
        if let Some(key) = self.server_key {
            self.transport.set_server_key(key);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        self.run_once().map(|_| ())
    }

    /// The poll timeout is the wait.
    fn idle(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::transport::{MemoryHub, OutboundTransport};
    use peerlink_types::{Command, Message};
    use uuid::Uuid;

    #[test]
    fn classifies_and_skips_garbage() {
        let hub = MemoryHub::new();
        let (local, remote, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let inbound = hub.register(local, "a:1");
        let outbound = hub.register(remote, "b:1");
        outbound.connect(&local, "a:1").unwrap();

        let inbox = Arc::new(Inbox::new());
        let metrics = Arc::new(NetworkMetrics::new());
        let receiver = Receiver::new(
            local,
            Box::new(inbound.clone()),
            Arc::new(BincodeCodec),
            inbox.clone(),
            LoopControl::new(),
            metrics.clone(),
            3,
            Duration::from_millis(10),
        )
        .with_server_key(PublicKey([9; 32]));

        let cmd = Command::new("DATA");
        let request = Message::request(remote, local, cmd, vec![], Duration::from_secs(5));
        let mut reply = Message::request(remote, local, cmd, vec![], Duration::from_secs(5));
        reply.is_reply = true;
        let transit = Message::request(remote, other, cmd, vec![], Duration::from_secs(5));

        outbound.send(&local, b"garbage").unwrap();
        for message in [&request, &reply, &transit] {
            outbound.send(&local, &BincodeCodec.encode(message).unwrap()).unwrap();
        }

        // receive cap of three: the garbage frame counts against it
        assert_eq!(receiver.run_once().unwrap(), 2);
        assert_eq!(inbox.lens(), (1, 1, 0));
        assert_eq!(receiver.run_once().unwrap(), 1);
        assert_eq!(inbox.lens(), (1, 1, 1));
        assert_eq!(receiver.run_once().unwrap(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.messages_received, 4);
    }

    #[test]
    fn closed_transport_ends_the_loop() {
        let hub = MemoryHub::new();
        let local = Uuid::new_v4();
        let transport = hub.register(local, "a:1");
        let mut receiver = Receiver::new(
            local,
            Box::new(transport.clone()),
            Arc::new(BincodeCodec),
            Arc::new(Inbox::new()),
            LoopControl::new(),
            Arc::new(NetworkMetrics::new()),
            10,
            Duration::from_millis(5),
        )
        .with_server_key(PublicKey([1; 32]));
        receiver.on_start().unwrap();
        assert_eq!(transport.server_key(), Some(PublicKey([1; 32])));

        hub.close(&local);
        assert!(receiver.tick().is_err());
    }
}
