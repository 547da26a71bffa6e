//! Byzantine protection facade.
//!
//! Composes the gossip transport and the quorum validator into the
//! mesh-level operations the rest of the node talks to: sign and verify
//! beacons, report and validate node failures, and answer "should I
//! even listen to this peer" queries.

use std::collections::HashSet;

use mycel_crypto::NodeId;
use mycel_gossip::{GossipTransport, MessageType, SignedEnvelope, VerifyError};
use mycel_quorum::{CriticalEvent, Evidence, EventKey, EventKind, QuorumValidator};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::Result;

/// Why a beacon was not accepted.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// The envelope carried some other message type.
    #[error("Expected a {expected} envelope, got {actual}")]
    WrongType {
        expected: MessageType,
        actual: MessageType,
    },

    /// The transport rejected the envelope.
    #[error(transparent)]
    Rejected(#[from] VerifyError),
}

/// Read-only protection snapshot for operators.
#[derive(Debug, Clone)]
pub struct ProtectionStats {
    pub quarantined: Vec<NodeId>,
    pub validated_failures: Vec<NodeId>,
    pub quorum_size: usize,
    pub pending_events: usize,
}

impl std::fmt::Display for ProtectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Protection: {} quarantined, {} validated failures, quorum {}, {} pending",
            self.quarantined.len(),
            self.validated_failures.len(),
            self.quorum_size,
            self.pending_events
        )
    }
}

/// Gossip transport + quorum validator, plus the node-local set of
/// quorum-confirmed failures.
#[derive(Debug)]
pub struct ByzantineGuard {
    transport: GossipTransport,
    validator: QuorumValidator,
    validated_failures: HashSet<NodeId>,
}

impl ByzantineGuard {
    pub fn new(transport: GossipTransport, validator: QuorumValidator) -> Self {
        Self {
            transport,
            validator,
            validated_failures: HashSet::new(),
        }
    }

    /// The local node identity.
    pub fn local_id(&self) -> NodeId {
        self.transport.local_id()
    }

    /// Sign a liveness beacon carrying the local neighbor view.
    pub fn sign_beacon(&self, neighbors: &[NodeId]) -> Result<SignedEnvelope> {
        let payload = json!({
            "neighbors": neighbors.iter().map(NodeId::to_hex).collect::<Vec<_>>(),
        });
        Ok(self.transport.sign(MessageType::Beacon, payload, None)?)
    }

    /// Verify an inbound beacon envelope.
    pub fn verify_beacon(
        &mut self,
        envelope: &SignedEnvelope,
    ) -> std::result::Result<(), BeaconError> {
        if envelope.msg_type != MessageType::Beacon {
            return Err(BeaconError::WrongType {
                expected: MessageType::Beacon,
                actual: envelope.msg_type,
            });
        }
        Ok(self.transport.verify(envelope)?)
    }

    /// Report a locally observed node failure for quorum validation.
    pub fn report_node_failure(&mut self, node: NodeId, evidence: Evidence) -> CriticalEvent {
        self.validator
            .report(EventKind::NodeFailure, node, evidence)
            .clone()
    }

    /// Countersign a node-failure event. On reaching quorum, the target
    /// joins the permanent validated-failure set.
    pub fn validate_node_failure(
        &mut self,
        target: NodeId,
        validator_id: NodeId,
        signature: Vec<u8>,
    ) -> Result<bool> {
        let key = EventKey {
            kind: EventKind::NodeFailure,
            target,
        };
        let validated = self.validator.validate(key, validator_id, signature)?;
        if validated && self.validated_failures.insert(target) {
            info!(node = %target, "node failure confirmed by quorum");
        }
        Ok(validated)
    }

    /// Whether a node's failure has been quorum-confirmed.
    pub fn is_validated_failure(&self, node: &NodeId) -> bool {
        self.validated_failures.contains(node)
    }

    /// Whether traffic from this sender should be considered at all.
    pub fn should_accept_message(&mut self, sender: &NodeId) -> bool {
        self.transport.should_accept_from(sender)
    }

    /// Whether a node is currently quarantined.
    pub fn is_quarantined(&mut self, node: &NodeId) -> bool {
        self.transport.is_quarantined(node)
    }

    /// A node's current reputation score.
    pub fn reputation(&self, node: &NodeId) -> f64 {
        self.transport.reputation(node)
    }

    /// Observability snapshot.
    pub fn protection_stats(&self) -> ProtectionStats {
        ProtectionStats {
            quarantined: self.transport.quarantined_nodes(),
            validated_failures: self.validated_failures.iter().copied().collect(),
            quorum_size: self.validator.quorum_size(),
            pending_events: self.validator.pending_count(),
        }
    }

    /// Evict never-validated events past their TTL (no-op without one).
    pub fn evict_expired_events(&mut self) -> usize {
        self.validator.evict_expired()
    }

    /// Direct access to the transport, for signing non-beacon traffic
    /// and key rotation.
    pub fn transport(&self) -> &GossipTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut GossipTransport {
        &mut self.transport
    }
}
