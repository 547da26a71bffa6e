//! Quorum validation of critical mesh events.
//!
//! No single node's word is enough to declare another node dead. A
//! failure observed locally becomes a pending [`CriticalEvent`]; it only
//! becomes network-wide truth once a threshold of *distinct* validators
//! have countersigned it:
//!
//! ```text
//! quorum_size = ceil(total_nodes × quorum_threshold)
//! ```
//!
//! Validation is monotonic - once an event is validated it never
//! reverts, and re-validating with the same validator never inflates
//! the signature count.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mycel_crypto::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Result type for quorum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the quorum validator.
#[derive(Debug, Error)]
pub enum Error {
    /// A validation referenced an event that was never reported here.
    #[error("Unknown event: {0:?}")]
    UnknownEvent(EventKey),
}

/// Kinds of critical events subject to quorum validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    NodeFailure,
    LinkDown,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeFailure => write!(f, "NODE_FAILURE"),
            Self::LinkDown => write!(f, "LINK_DOWN"),
        }
    }
}

/// Evidence attached to a reported event.
///
/// A tagged enum rather than an open map, so new evidence kinds extend
/// the type instead of loosening it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    /// The peer went silent: no beacon for longer than the timeout.
    /// Latency is treated as unbounded and packet loss as total.
    PeerTimeout {
        /// Unix seconds the peer was last heard from.
        last_seen: f64,
        /// Seconds elapsed since then at reporting time.
        elapsed_secs: f64,
    },
    /// A link degraded below usability rather than going fully dark.
    LinkQuality { latency_ms: f64, packet_loss: f64 },
    /// Escape hatch for evidence kinds this node does not understand.
    Custom(serde_json::Value),
}

/// Identity of an event: one pending entry per (kind, target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: EventKind,
    pub target: NodeId,
}

/// A proposed, quorum-gated fact about the mesh.
#[derive(Debug, Clone)]
pub struct CriticalEvent {
    pub kind: EventKind,
    pub target: NodeId,
    pub evidence: Evidence,
    /// Unix seconds when first reported locally.
    pub reported_at: f64,
    /// Countersignatures keyed by validator identity. Keyed storage
    /// makes duplicate validators structurally impossible.
    pub signatures: BTreeMap<NodeId, Vec<u8>>,
    pub validated: bool,
}

impl CriticalEvent {
    /// Identity key for this event.
    pub fn key(&self) -> EventKey {
        EventKey {
            kind: self.kind,
            target: self.target,
        }
    }
}

/// Collects countersignatures until the threshold is met.
#[derive(Debug)]
pub struct QuorumValidator {
    quorum_size: usize,
    pending: HashMap<EventKey, CriticalEvent>,
    first_seen: HashMap<EventKey, Instant>,
    /// Optional eviction horizon for events that never reach quorum.
    /// `None` keeps them forever, matching the minimal design.
    pending_ttl: Option<Duration>,
}

impl QuorumValidator {
    /// Build a validator for a mesh of `total_nodes` with the given
    /// threshold fraction. The quorum size is fixed at construction
    /// and never below one: an event always needs at least one
    /// countersignature to become truth.
    pub fn new(total_nodes: usize, quorum_threshold: f64) -> Self {
        let quorum_size = ((total_nodes as f64 * quorum_threshold).ceil() as usize).max(1);
        Self {
            quorum_size,
            pending: HashMap::new(),
            first_seen: HashMap::new(),
            pending_ttl: None,
        }
    }

    /// Enable eviction of never-validated events older than `ttl`.
    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = Some(ttl);
        self
    }

    /// The number of distinct countersignatures required.
    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    /// Report a critical event. Idempotent per `(kind, target)`: a
    /// repeat report returns the existing pending event unchanged.
    pub fn report(&mut self, kind: EventKind, target: NodeId, evidence: Evidence) -> &CriticalEvent {
        let key = EventKey { kind, target };
        self.first_seen.entry(key).or_insert_with(Instant::now);
        self.pending.entry(key).or_insert_with(|| {
            debug!(%kind, target = %target, "critical event reported");
            CriticalEvent {
                kind,
                target,
                evidence,
                reported_at: unix_now(),
                signatures: BTreeMap::new(),
                validated: false,
            }
        })
    }

    /// Add a validator's countersignature to a pending event and return
    /// the updated validated flag.
    ///
    /// Idempotent per validator. Must be called under the owner's lock;
    /// the signature set has a single mutation point by construction.
    pub fn validate(
        &mut self,
        key: EventKey,
        validator: NodeId,
        signature: Vec<u8>,
    ) -> Result<bool> {
        let event = self
            .pending
            .get_mut(&key)
            .ok_or(Error::UnknownEvent(key))?;

        event.signatures.entry(validator).or_insert(signature);

        if !event.validated && event.signatures.len() >= self.quorum_size {
            event.validated = true;
            info!(
                kind = %event.kind,
                target = %event.target,
                signatures = event.signatures.len(),
                quorum = self.quorum_size,
                "critical event validated by quorum"
            );
        }
        Ok(event.validated)
    }

    /// Look up an event by key.
    pub fn get(&self, key: &EventKey) -> Option<&CriticalEvent> {
        self.pending.get(key)
    }

    /// Number of tracked events (pending and validated).
    pub fn event_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of events still short of quorum.
    pub fn pending_count(&self) -> usize {
        self.pending.values().filter(|e| !e.validated).count()
    }

    /// Evict never-validated events older than the configured TTL.
    /// Returns how many were removed. No-op when no TTL is set.
    pub fn evict_expired(&mut self) -> usize {
        let Some(ttl) = self.pending_ttl else {
            return 0;
        };
        let now = Instant::now();
        let expired: Vec<EventKey> = self
            .pending
            .iter()
            .filter(|(key, event)| {
                !event.validated
                    && self
                        .first_seen
                        .get(key)
                        .is_some_and(|seen| now.duration_since(*seen) > ttl)
            })
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.pending.remove(key);
            self.first_seen.remove(key);
            debug!(?key, "evicted expired pending event");
        }
        expired.len()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
