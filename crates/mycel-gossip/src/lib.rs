//! Signed gossip transport for the Mycel mesh control plane.
//!
//! Every control message that crosses the wire is a [`SignedEnvelope`]:
//! a canonical, replay-protected, signed statement by one node. The
//! [`GossipTransport`] is the only door such a message can enter through,
//! and it is deliberately unforgiving:
//!
//! 1. Quarantined senders are dropped before any work is done.
//! 2. A sliding one-second rate limit bounds per-sender throughput.
//! 3. A `(sender, epoch, nonce)` triple is accepted at most once.
//! 4. Envelopes more than one epoch behind the local clock are stale.
//! 5. Only then is the signature checked.
//!
//! Each rejection costs the sender reputation; a collapsed reputation
//! quarantines the sender entirely. Rejections are *values*, not panics -
//! adversarial input must never take the transport down.

pub mod envelope;
pub mod reputation;
pub mod transport;

pub use envelope::{MessageType, SignedEnvelope};
pub use reputation::{ReputationLedger, Violation, QUARANTINE_THRESHOLD};
pub use transport::{GossipConfig, GossipTransport, VerifyError};

use thiserror::Error;

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure errors (not protocol rejections - see [`VerifyError`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Envelope could not be canonically encoded for signing.
    #[error("Envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The signature backend failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] mycel_crypto::Error),
}
