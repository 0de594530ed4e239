//! Mesh assembly: wires the shared state and starts the three loop threads.

use peerlink_storage::{MemoryPeerStore, PeerStore};
use peerlink_types::{Command, Message, Peer, PeerId, PublicKey};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ApplicationLoop;
use crate::clock::{Clock, SystemClock};
use crate::codec::{BincodeCodec, MessageCodec};
use crate::concern::{Concern, ConcernRegistry, Priority};
use crate::config::MeshConfig;
use crate::discovery::AskAroundProtocol;
use crate::dispatcher::ConcernDispatcher;
use crate::error::Result;
use crate::heartbeat::HeartbeatProtocol;
use crate::identity_store::{KeyStore, MemoryKeyStore};
use crate::inbox::Inbox;
use crate::metrics::{NetworkMetrics, NetworkMetricsSnapshot};
use crate::peers::PeerTable;
use crate::receiver::Receiver;
use crate::router::{DropHook, Router};
use crate::sender::{SendQueues, Sender};
use crate::service::{LoopControl, LoopHandle};
use crate::transport::{InboundTransport, OutboundTransport};

/// Everything a mesh instance needs from its host.
pub struct MeshParts {
    pub local: PeerId,
    pub config: MeshConfig,
    pub outbound: Box<dyn OutboundTransport>,
    pub inbound: Box<dyn InboundTransport>,
    pub clock: Arc<dyn Clock>,
    pub codec: Arc<dyn MessageCodec>,
    pub keys: Arc<dyn KeyStore>,
    pub store: Arc<dyn PeerStore>,
    pub server_key: Option<PublicKey>,
    /// Application concerns, registered after the built-in ones.
    pub concerns: Vec<Arc<dyn Concern>>,
    pub on_drop: Option<DropHook>,
}

impl MeshParts {
    /// Parts with a system clock, the bincode codec, and empty in-memory key
    /// and peer stores.
    pub fn new(
        local: PeerId,
        config: MeshConfig,
        outbound: Box<dyn OutboundTransport>,
        inbound: Box<dyn InboundTransport>,
    ) -> Self {
        Self {
            local,
            config,
            outbound,
            inbound,
            clock: Arc::new(SystemClock::new()),
            codec: Arc::new(BincodeCodec),
            keys: Arc::new(MemoryKeyStore::new()),
            store: Arc::new(MemoryPeerStore::new()),
            server_key: None,
            concerns: Vec::new(),
            on_drop: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_keys(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PeerStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_server_key(mut self, key: PublicKey) -> Self {
        self.server_key = Some(key);
        self
    }

    pub fn with_concern(mut self, concern: Arc<dyn Concern>) -> Self {
        self.concerns.push(concern);
        self
    }

    pub fn with_on_drop(mut self, hook: DropHook) -> Self {
        self.on_drop = Some(hook);
        self
    }
}

/// A running mesh instance. Dropping it stops the loops.
pub struct Mesh {
    local: PeerId,
    config: MeshConfig,
    clock: Arc<dyn Clock>,
    peers: Arc<PeerTable>,
    inbox: Arc<Inbox>,
    queues: Arc<SendQueues>,
    metrics: Arc<NetworkMetrics>,
    // stop order: receiver, application loop, sender
    receiver: LoopHandle,
    app: LoopHandle,
    sender: LoopHandle,
}

impl Mesh {
    pub fn start(parts: MeshParts) -> Result<Self> {
        let MeshParts {
            local,
            config,
            outbound,
            inbound,
            clock,
            codec,
            keys,
            store,
            server_key,
            concerns,
            on_drop,
        } = parts;

        let peers = Arc::new(PeerTable::new(local, config.heart_beat_interval));
        let inbox = Arc::new(Inbox::new());
        let queues = Arc::new(SendQueues::new());
        let metrics = Arc::new(NetworkMetrics::new());

        let ask_around = Arc::new(AskAroundProtocol::new(peers.clone(), &config));
        let mut registry = ConcernRegistry::new();
        registry.register(Arc::new(HeartbeatProtocol::new(peers.clone(), config.clone())));
        registry.register(ask_around.clone());
        for concern in concerns {
            if registry.register(concern.clone()).is_some() {
                warn!(command = %concern.command(), "Concern replaced a built-in handler");
            }
        }
        let registry = Arc::new(registry);

        let sender_control = LoopControl::new();
        let app_control = LoopControl::new();

        let sender = Sender::new(
            outbound,
            codec.clone(),
            queues.clone(),
            peers.clone(),
            keys,
            registry.clone(),
            metrics.clone(),
            clock.clone(),
            config.send_idle,
        );
        let sender = LoopHandle::spawn(sender, sender_control.clone())?;

        let mut router = Router::new(
            peers.clone(),
            ask_around,
            metrics.clone(),
            config.default_route,
            config.route_cap,
        );
        if let Some(hook) = on_drop {
            router = router.with_on_drop(hook);
        }
        let dispatcher = ConcernDispatcher::new(registry.clone(), metrics.clone(), config.process_cap);
        let app = ApplicationLoop::new(
            peers.clone(),
            inbox.clone(),
            queues.clone(),
            dispatcher,
            router,
            store,
            clock.clone(),
            sender_control,
            config.tick_interval,
            config.sync_db_interval,
        );
        let app = LoopHandle::spawn(app, app_control.clone())?;

        let mut receiver = Receiver::new(
            local,
            inbound,
            codec,
            inbox.clone(),
            app_control,
            metrics.clone(),
            config.receive_cap,
            config.poll_timeout,
        );
        if let Some(key) = server_key {
            receiver = receiver.with_server_key(key);
        }
        let receiver = LoopHandle::spawn(receiver, LoopControl::new())?;

        info!(local = %local, concerns = registry.len(), "Mesh started");
        Ok(Self {
            local,
            config,
            clock,
            peers,
            inbox,
            queues,
            metrics,
            receiver,
            app,
            sender,
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Make a peer known, e.g. one with an address from configuration.
    pub fn add_peer(&self, peer: Peer) {
        self.peers.upsert(peer);
    }

    pub fn peer(&self, id: &PeerId) -> Option<Peer> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.all_peers()
    }

    pub fn metrics(&self) -> NetworkMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// A request from this instance with the default lifetime.
    pub fn new_request(&self, to: PeerId, command: Command, payload: Vec<u8>) -> Message {
        Message::request(
            self.local,
            to,
            command,
            payload,
            self.clock.now() + self.config.default_ttl,
        )
    }

    /// Queue application traffic. Messages without a known path go through
    /// the router first.
    pub fn submit(&self, priority: Priority, message: Message) {
        if message.to == self.local {
            self.inbox.push_local(message);
            self.app.control().wake();
            return;
        }
        let direct = message.next_hop.is_some()
            || self
                .peers
                .get(&message.to)
                .map(|peer| peer.is_connected())
                .unwrap_or(false);
        if direct {
            self.queues.enqueue(priority, message);
            self.sender.control().wake();
        } else {
            self.inbox.push_route(message);
            self.app.control().wake();
        }
    }

    /// Stop all loops after their current tick; the peer directory is synced
    /// one last time.
    pub fn stop(mut self) {
        self.receiver.stop();
        self.app.stop();
        self.sender.stop();
        info!(local = %self.local, "Mesh stopped");
    }
}
