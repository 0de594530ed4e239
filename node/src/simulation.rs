//! In-process mesh simulation: a chain of instances over a [`MemoryHub`],
//! with the first instance pinging the last one through the middle.

use anyhow::{Context, Result};
use peerlink_network::{
    Clock, Concern, MemoryHub, MemoryKeyStore, Mesh, MeshParts, NetworkMetricsSnapshot, Priority,
    Reply, SystemClock,
};
use peerlink_storage::{MemoryPeerStore, PeerStore, SledPeerStore};
use peerlink_types::{Command, Message, Peer, PeerId, PublicKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settings::NodeSettings;

pub const PING: Command = Command::new("PING");

const BASE_PORT: u16 = 7400;

/// Answers pings with their payload and measures the round trip of replies.
/// The payload is the send time in microseconds on the shared clock.
pub struct PingConcern {
    local: PeerId,
    clock: Arc<dyn Clock>,
    reply_ttl: Duration,
    replies: AtomicU64,
    latency_micros: AtomicU64,
}

impl PingConcern {
    pub fn new(local: PeerId, clock: Arc<dyn Clock>, reply_ttl: Duration) -> Self {
        Self {
            local,
            clock,
            reply_ttl,
            replies: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }

    pub fn payload(now: Duration) -> Vec<u8> {
        (now.as_micros() as u64).to_be_bytes().to_vec()
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        let replies = self.replies();
        if replies == 0 {
            return None;
        }
        Some(self.latency_micros.load(Ordering::Relaxed) as f64 / replies as f64 / 1000.0)
    }
}

impl Concern for PingConcern {
    fn command(&self) -> Command {
        PING
    }

    fn process_request(&self, message: &Message, now: Duration) -> peerlink_network::Result<Reply> {
        let reply = Message::reply_to(message, self.local, message.payload.clone(), now + self.reply_ttl);
        Ok(Some((Priority::Medium, reply)))
    }

    fn process_reply(&self, message: &Message, _now: Duration) -> peerlink_network::Result<Reply> {
        let Ok(bytes) = <[u8; 8]>::try_from(message.payload.as_slice()) else {
            warn!(source = %message.source, len = message.payload.len(), "Malformed ping reply");
            return Ok(None);
        };
        let sent = Duration::from_micros(u64::from_be_bytes(bytes));
        let latency = self.clock.now().saturating_sub(sent);
        self.replies.fetch_add(1, Ordering::Relaxed);
        self.latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        debug!(source = %message.source, latency_ms = latency.as_millis() as u64, "Ping answered");
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
pub struct InstanceReport {
    pub id: String,
    pub metrics: NetworkMetricsSnapshot,
    /// Known peers per state
    pub peers: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub instances: Vec<InstanceReport>,
    pub pings_sent: u64,
    pub pings_answered: u64,
    pub mean_latency_ms: Option<f64>,
}

struct Instance {
    mesh: Mesh,
    sled: Option<Arc<SledPeerStore>>,
}

fn address(n: usize) -> (String, u16) {
    ("127.0.0.1".to_string(), BASE_PORT + n as u16)
}

fn open_store(settings: &NodeSettings, id: &PeerId) -> Result<(Arc<dyn PeerStore>, Option<Arc<SledPeerStore>>)> {
    match &settings.data_dir {
        Some(dir) => {
            let path = dir.join(id.to_string());
            let store = Arc::new(
                SledPeerStore::new(&path)
                    .with_context(|| format!("Failed to open peer directory at {}", path.display()))?,
            );
            Ok((store.clone(), Some(store)))
        }
        None => Ok((Arc::new(MemoryPeerStore::new()), None)),
    }
}

/// Run the simulation for `settings.run_secs` and report what each instance saw.
pub fn run(settings: &NodeSettings) -> Result<SimulationReport> {
    let config = settings.mesh_config();
    let hub = MemoryHub::new();
    let keys = Arc::new(MemoryKeyStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let ids: Vec<PeerId> = (0..settings.instances).map(|_| Uuid::new_v4()).collect();
    for (n, id) in ids.iter().enumerate() {
        keys.insert(*id, PublicKey([(n % 255) as u8 + 1; 32]));
    }

    let first = ids[0];
    let last = ids[ids.len() - 1];
    let ping = Arc::new(PingConcern::new(first, clock.clone(), config.default_ttl));

    let mut instances = Vec::with_capacity(ids.len());
    for (n, id) in ids.iter().enumerate() {
        let (host, port) = address(n);
        let transport = hub.register(*id, format!("{}:{}", host, port));
        let (store, sled) = open_store(settings, id)?;
        let concern: Arc<dyn Concern> = if *id == first {
            ping.clone()
        } else {
            Arc::new(PingConcern::new(*id, clock.clone(), config.default_ttl))
        };
        let parts = MeshParts::new(*id, config.clone(), Box::new(transport.clone()), Box::new(transport))
            .with_clock(clock.clone())
            .with_keys(keys.clone())
            .with_store(store)
            .with_server_key(PublicKey([(n % 255) as u8 + 1; 32]))
            .with_concern(concern);
        let mesh = Mesh::start(parts).with_context(|| format!("Failed to start instance {}", n))?;
        instances.push(Instance { mesh, sled });
    }

    // each instance knows the address of its successor only
    let now = clock.now();
    for n in 0..instances.len() - 1 {
        let (host, port) = address(n + 1);
        instances[n]
            .mesh
            .add_peer(Peer::new(ids[n + 1], now, config.heart_beat_interval).with_address(host, port));
    }
    info!(instances = instances.len(), first = %first, last = %last, "Simulation started");

    let deadline = Instant::now() + Duration::from_secs(settings.run_secs);
    let ping_interval = Duration::from_millis(settings.ping_interval_ms.max(1));
    let mut pings_sent = 0u64;
    while Instant::now() < deadline {
        let origin = &instances[0].mesh;
        let request = origin.new_request(last, PING, PingConcern::payload(clock.now()));
        origin.submit(Priority::Medium, request);
        pings_sent += 1;
        thread::sleep(ping_interval.min(deadline.saturating_duration_since(Instant::now())));
    }

    let mut reports = Vec::with_capacity(instances.len());
    for Instance { mesh, sled } in instances {
        let mut peers = BTreeMap::new();
        for peer in mesh.peers() {
            *peers.entry(format!("{:?}", peer.state())).or_insert(0) += 1;
        }
        let id = mesh.local_id().to_string();
        let metrics = mesh.metrics();
        mesh.stop();
        if let Some(store) = sled {
            if let Err(e) = store.flush() {
                warn!(instance = %id, error = %e, "Failed to flush peer directory");
            }
        }
        reports.push(InstanceReport { id, metrics, peers });
    }

    let report = SimulationReport {
        instances: reports,
        pings_sent,
        pings_answered: ping.replies(),
        mean_latency_ms: ping.mean_latency_ms(),
    };
    info!(
        sent = report.pings_sent,
        answered = report.pings_answered,
        "Simulation finished"
    );
    Ok(report)
}
