//! Error types for the delivery substrate.

use peerlink_types::PeerId;
use thiserror::Error;

/// Failures reported by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no connection to {0}")]
    NotConnected(PeerId),
    #[error("unknown identity {0}")]
    UnknownIdentity(PeerId),
    #[error("address mismatch for {peer}: {address}")]
    AddressMismatch { peer: PeerId, address: String },
    #[error("link to {0} is down")]
    LinkDown(PeerId),
    #[error("transport closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("no public key for peer {0}")]
    MissingKey(PeerId),

    #[error("no address for peer {0}")]
    NoAddress(PeerId),

    #[error("storage error: {0}")]
    Storage(#[from] peerlink_storage::StorageError),

    #[error("concern error: {0}")]
    Concern(String),

    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
