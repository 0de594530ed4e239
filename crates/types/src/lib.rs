//! Peerlink Types
//!
//! Leaf data types shared by every Peerlink crate.
//!
//! ## Modules
//! - `command`: fixed-width protocol tokens identifying a concern
//! - `message`: the routed message envelope
//! - `peer`: peer records and their liveness state
//! - `key`: public keys exchanged with the transport

pub mod command;
pub mod key;
pub mod message;
pub mod peer;

pub use command::{Command, CommandError, COMMAND_WIDTH};
pub use key::PublicKey;
pub use message::Message;
pub use peer::{Liveness, Peer, PeerState};

/// Identity of an instance on the mesh.
pub type PeerId = uuid::Uuid;
