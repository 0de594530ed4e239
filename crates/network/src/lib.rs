//! Peerlink Network Core
//!
//! Message delivery substrate for a peer-to-peer mesh: priority queues,
//! peer liveness, next-hop routing, and the three loop threads that drive a
//! transport.
//!
//! ## Modules
//! - `queue`: fast, regular and slow outbound queue disciplines
//! - `peers`: the shared peer table
//! - `router`: next-hop resolution and the discovery contract
//! - `concern`: protocol plugin contract and registry
//! - `dispatcher`: inbound request/reply demultiplexing
//! - `heartbeat`: peer liveness protocol
//! - `discovery`: ask-around path discovery
//! - `sender` / `receiver` / `app`: the loop threads
//! - `service`: loop thread scaffolding (stop flag, wake event)
//! - `mesh`: assembly of a running instance
//! - `transport`, `codec`, `identity_store`: external boundaries
//! - `metrics`: delivery counters

pub mod app;
pub mod clock;
pub mod codec;
pub mod concern;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod identity_store;
pub mod inbox;
pub mod mesh;
pub mod metrics;
pub mod peers;
pub mod queue;
pub mod receiver;
pub mod router;
pub mod sender;
pub mod service;
pub mod transport;

// ------------------------------------------------------------
// Re-exports for workspace-wide use
// ------------------------------------------------------------

// Loops & assembly
pub use app::ApplicationLoop;
pub use mesh::{Mesh, MeshParts};
pub use receiver::Receiver;
pub use sender::{SendQueues, Sender};
pub use service::{LoopControl, LoopHandle, LoopWorker, Wakeup};

// Protocol plugins
pub use concern::{Concern, ConcernRegistry, Outbox, Priority, Reply, SendOutcome};
pub use discovery::{AskAround, AskAroundProtocol, ASK_AROUND};
pub use dispatcher::ConcernDispatcher;
pub use heartbeat::{HeartbeatProtocol, HEARTBEAT};

// Routing & peer state
pub use inbox::{InboundBatch, Inbox};
pub use peers::PeerTable;
pub use queue::{FastQueue, MessageQueue, RegularQueue, SlowQueue};
pub use router::{Discovery, DropHook, RouteDecision, Router};

// Boundaries
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{BincodeCodec, MessageCodec, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use identity_store::{KeyStore, MemoryKeyStore};
pub use transport::{InboundTransport, MemoryHub, MemoryTransport, OutboundTransport};

// Configuration, errors & metrics
pub use config::{MeshConfig, UNRESPONSIVE_FACTOR};
pub use error::{NetworkError, Result, TransportError};
pub use metrics::{NetworkMetrics, NetworkMetricsSnapshot};
