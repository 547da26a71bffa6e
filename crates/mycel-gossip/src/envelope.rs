//! Signed control-message envelope.
//!
//! The signing input is the *canonical* encoding of the envelope: every
//! field except `signature`, serialized as JSON with keys in sorted
//! order. Two nodes that disagree on field order would otherwise never
//! agree on what was signed.

use std::time::{SystemTime, UNIX_EPOCH};

use mycel_crypto::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Control-plane message kinds carried by the gossip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Periodic liveness announcement with the sender's neighbor view.
    Beacon,
    /// A locally detected failure, offered for quorum validation.
    FailureReport,
    /// Announcement that the sender rotated keys into a new epoch.
    KeyRotation,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beacon => write!(f, "BEACON"),
            Self::FailureReport => write!(f, "FAILURE_REPORT"),
            Self::KeyRotation => write!(f, "KEY_ROTATION"),
        }
    }
}

/// A canonical, replay-protected, signed control message.
///
/// Created once per outbound message and consumed once by the receiving
/// transport; nothing outlives the anti-replay window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// What kind of control message this is.
    pub msg_type: MessageType,

    /// Identity of the signing node.
    pub sender_id: NodeId,

    /// Wall-clock seconds since the Unix epoch at signing time.
    pub timestamp: f64,

    /// Per-message unique value; with `epoch`, detects replays.
    pub nonce: u64,

    /// Sender-scoped key generation; increments on key rotation.
    pub epoch: u64,

    /// Structured message body.
    pub payload: Value,

    /// Signature over [`signing_bytes`](Self::signing_bytes).
    pub signature: Vec<u8>,

    /// Public key the signature checks against. The receiver derives
    /// the sender's identity from this, never from `sender_id` alone.
    pub public_key: Vec<u8>,
}

impl SignedEnvelope {
    /// Build an unsigned envelope; the transport fills in `signature`.
    pub(crate) fn unsigned(
        msg_type: MessageType,
        sender_id: NodeId,
        nonce: u64,
        epoch: u64,
        payload: Value,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            msg_type,
            sender_id,
            timestamp: unix_now(),
            nonce,
            epoch,
            payload,
            signature: Vec::new(),
            public_key,
        }
    }

    /// Canonical signing input: all fields except `signature`, with
    /// object keys sorted.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        // serde_json's Map keeps keys in sorted order, so converting to
        // a Value and re-encoding yields the canonical form.
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        Ok(serde_json::to_vec(&value)?)
    }

    /// Wire encoding. JSON keeps the payload self-describing; the
    /// canonical form in [`signing_bytes`](Self::signing_bytes) is what
    /// actually matters bit-for-bit.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode from the wire. Malformed input yields `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Microsecond-precision nonce from the wall clock.
pub(crate) fn micros_nonce() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
