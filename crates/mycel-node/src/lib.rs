//! Mycel mesh node: session, Byzantine protection and health loops.
//!
//! This crate ties the control plane together. A [`MeshSession`] owns
//! the peer registry, the pheromone routing table and the protection
//! state; the [`ByzantineGuard`] composes the gossip transport with the
//! quorum validator; the monitor module runs the periodic health-check
//! and evaporation loops.
//!
//! Control flow for an inbound beacon:
//!
//! ```text
//! beacon → GossipTransport::verify → registry update → Router::reinforce
//! ```
//!
//! and for a failure: health tick notices the silence, reports a
//! NODE_FAILURE event, other nodes countersign, and once quorum is
//! reached the peer is excluded from routing for good.

pub mod config;
pub mod guard;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod session;

pub use config::MeshConfig;
pub use guard::{BeaconError, ByzantineGuard, ProtectionStats};
pub use monitor::{health_tick, spawn_evaporation_loop, spawn_health_loop};
pub use registry::{PeerRegistry, PeerState, StalePeer};
pub use session::{FailureReportPayload, MeshHandles, MeshSession};

use mycel_gossip::MessageType;
use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the node layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport rejected an envelope.
    #[error(transparent)]
    Rejected(#[from] mycel_gossip::VerifyError),

    /// An entrypoint received the wrong kind of envelope.
    #[error("Unexpected message type: {0}")]
    UnexpectedMessageType(MessageType),

    /// An envelope payload did not match its expected shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Gossip infrastructure failure.
    #[error(transparent)]
    Gossip(#[from] mycel_gossip::Error),

    /// Quorum bookkeeping failure.
    #[error(transparent)]
    Quorum(#[from] mycel_quorum::Error),

    /// Signature backend failure (fatal at construction).
    #[error(transparent)]
    Crypto(#[from] mycel_crypto::Error),
}
