//! Transport boundary.
//!
//! The substrate only needs an identity-addressed frame transport. The
//! outbound half is owned by the sender thread, the inbound half by the
//! receiver thread. [`MemoryHub`] provides an in-process implementation used
//! by the node simulator and the tests.

use parking_lot::{Condvar, Mutex, RwLock};
use peerlink_types::{PeerId, PublicKey};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;

pub trait OutboundTransport: Send {
    /// Open a link to `peer` at `address`.
    fn connect(&self, peer: &PeerId, address: &str) -> Result<(), TransportError>;
    /// Whether a link to `peer` exists, in either direction.
    fn is_connected(&self, peer: &PeerId) -> bool;
    fn send(&self, peer: &PeerId, frame: &[u8]) -> Result<(), TransportError>;
    /// Install the key the channel to `peer` is authenticated with.
    fn set_peer_key(&self, peer: &PeerId, key: PublicKey);
}

pub trait InboundTransport: Send {
    /// Wait up to `timeout` for a readable frame.
    fn poll(&self, timeout: Duration) -> Result<bool, TransportError>;
    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError>;
    fn set_server_key(&self, key: PublicKey);
}

#[derive(Debug)]
struct Endpoint {
    address: String,
    frames: Mutex<VecDeque<Vec<u8>>>,
    readable: Condvar,
    links: Mutex<HashSet<PeerId>>,
    closed: AtomicBool,
}

impl Endpoint {
    fn push(&self, frame: Vec<u8>) {
        self.frames.lock().push_back(frame);
        self.readable.notify_all();
    }
}

/// In-process switch connecting [`MemoryTransport`] endpoints.
#[derive(Debug, Default)]
pub struct MemoryHub {
    endpoints: RwLock<HashMap<PeerId, Arc<Endpoint>>>,
    cut: RwLock<HashSet<(PeerId, PeerId)>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an endpoint for `id` reachable at `address`.
    pub fn register(self: &Arc<Self>, id: PeerId, address: impl Into<String>) -> MemoryTransport {
        let endpoint = Arc::new(Endpoint {
            address: address.into(),
            frames: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
            links: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });
        self.endpoints.write().insert(id, endpoint.clone());
        MemoryTransport {
            inner: Arc::new(TransportInner {
                hub: self.clone(),
                local: id,
                endpoint,
                peer_keys: Mutex::new(HashMap::new()),
                server_key: Mutex::new(None),
            }),
        }
    }

    /// Cut or restore the link between `a` and `b` in both directions.
    pub fn set_link(&self, a: PeerId, b: PeerId, up: bool) {
        let mut cut = self.cut.write();
        if up {
            cut.remove(&(a, b));
            cut.remove(&(b, a));
        } else {
            cut.insert((a, b));
            cut.insert((b, a));
        }
    }

    /// Close an endpoint; its receiver sees [`TransportError::Closed`].
    pub fn close(&self, id: &PeerId) {
        if let Some(endpoint) = self.endpoints.read().get(id) {
            endpoint.closed.store(true, Ordering::SeqCst);
            endpoint.readable.notify_all();
        }
    }

    fn is_cut(&self, a: &PeerId, b: &PeerId) -> bool {
        self.cut.read().contains(&(*a, *b))
    }

    fn endpoint(&self, id: &PeerId) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(id).cloned()
    }
}

#[derive(Debug)]
struct TransportInner {
    hub: Arc<MemoryHub>,
    local: PeerId,
    endpoint: Arc<Endpoint>,
    peer_keys: Mutex<HashMap<PeerId, PublicKey>>,
    server_key: Mutex<Option<PublicKey>>,
}

/// One instance's view of a [`MemoryHub`]. Clones share the endpoint, so the
/// sender and receiver threads can each own a handle.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<TransportInner>,
}

impl MemoryTransport {
    pub fn local_id(&self) -> PeerId {
        self.inner.local
    }

    pub fn peer_key(&self, peer: &PeerId) -> Option<PublicKey> {
        self.inner.peer_keys.lock().get(peer).copied()
    }

    pub fn server_key(&self) -> Option<PublicKey> {
        *self.inner.server_key.lock()
    }
}

impl OutboundTransport for MemoryTransport {
    fn connect(&self, peer: &PeerId, address: &str) -> Result<(), TransportError> {
        let inner = &self.inner;
        let remote = inner
            .hub
            .endpoint(peer)
            .ok_or(TransportError::UnknownIdentity(*peer))?;
        if remote.address != address {
            return Err(TransportError::AddressMismatch {
                peer: *peer,
                address: address.to_string(),
            });
        }
        if inner.hub.is_cut(&inner.local, peer) {
            return Err(TransportError::LinkDown(*peer));
        }
        inner.endpoint.links.lock().insert(*peer);
        remote.links.lock().insert(inner.local);
        debug!(local = %inner.local, peer = %peer, address, "Memory link established");
        Ok(())
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.inner.endpoint.links.lock().contains(peer)
    }

    fn send(&self, peer: &PeerId, frame: &[u8]) -> Result<(), TransportError> {
        let inner = &self.inner;
        if !self.is_connected(peer) {
            return Err(TransportError::NotConnected(*peer));
        }
        if inner.hub.is_cut(&inner.local, peer) {
            return Err(TransportError::LinkDown(*peer));
        }
        let remote = inner
            .hub
            .endpoint(peer)
            .ok_or(TransportError::UnknownIdentity(*peer))?;
        if remote.closed.load(Ordering::SeqCst) {
            return Err(TransportError::LinkDown(*peer));
        }
        remote.push(frame.to_vec());
        Ok(())
    }

    fn set_peer_key(&self, peer: &PeerId, key: PublicKey) {
        self.inner.peer_keys.lock().insert(*peer, key);
    }
}

impl InboundTransport for MemoryTransport {
    fn poll(&self, timeout: Duration) -> Result<bool, TransportError> {
        let endpoint = &self.inner.endpoint;
        let mut frames = endpoint.frames.lock();
        if frames.is_empty() && !timeout.is_zero() && !endpoint.closed.load(Ordering::SeqCst) {
            endpoint.readable.wait_for(&mut frames, timeout);
        }
        if frames.is_empty() && endpoint.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(!frames.is_empty())
    }

    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.inner.endpoint.frames.lock().pop_front())
    }

    fn set_server_key(&self, key: PublicKey) {
        *self.inner.server_key.lock() = Some(key);
    }
}
