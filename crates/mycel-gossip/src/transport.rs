//! The gossip transport: signing, verification, anti-replay, rate
//! limiting, and the reputation hooks that feed quarantine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use mycel_crypto::{NodeId, Signer, Verifier};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::envelope::{micros_nonce, MessageType, SignedEnvelope};
use crate::reputation::{ReputationLedger, Violation, QUARANTINE_THRESHOLD, QUARANTINE_WINDOW};
use crate::Result;

/// Width of the sliding rate-limit window.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Tuning knobs for the transport.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Maximum accepted messages per sender inside the sliding
    /// one-second window. Excess traffic is a violation, not a queue.
    pub rate_limit_per_sec: usize,

    /// How long a quarantine lasts once reputation collapses.
    pub quarantine_window: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 100,
            quarantine_window: QUARANTINE_WINDOW,
        }
    }
}

/// Why an envelope was rejected.
///
/// Every variant except [`Quarantined`](VerifyError::Quarantined)
/// penalizes the sender's reputation. None of them is an infrastructure
/// failure; the transport never raises for malformed input.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerifyError {
    #[error("Sender {0} is quarantined")]
    Quarantined(NodeId),

    #[error("Rate limit exceeded for sender {0}")]
    RateLimited(NodeId),

    #[error("Replay attack detected: nonce {nonce} already seen in epoch {epoch}")]
    Replay { nonce: u64, epoch: u64 },

    #[error("Stale epoch {envelope_epoch} (current epoch {current_epoch})")]
    StaleEpoch {
        envelope_epoch: u64,
        current_epoch: u64,
    },

    #[error("Invalid signature from sender {0}")]
    BadSignature(NodeId),
}

impl VerifyError {
    fn violation(&self) -> Option<Violation> {
        match self {
            Self::Quarantined(_) => None,
            Self::RateLimited(_) => Some(Violation::RateLimitExceeded),
            Self::Replay { .. } => Some(Violation::ReplayAttack),
            Self::StaleEpoch { .. } => Some(Violation::StaleEpoch),
            Self::BadSignature(_) => Some(Violation::InvalidSignature),
        }
    }
}

/// Signs outgoing envelopes and gate-keeps incoming ones.
pub struct GossipTransport {
    local_id: NodeId,
    signer: Box<dyn Signer>,
    verifier: Box<dyn Verifier>,
    current_epoch: u64,

    /// Anti-replay window: sender → epoch → accepted nonces.
    seen_nonces: HashMap<NodeId, HashMap<u64, HashSet<u64>>>,

    /// Accept timestamps per sender inside the rate window.
    recent: HashMap<NodeId, VecDeque<Instant>>,

    ledger: ReputationLedger,
    config: GossipConfig,
}

impl std::fmt::Debug for GossipTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipTransport")
            .field("local_id", &self.local_id)
            .field("current_epoch", &self.current_epoch)
            .field("tracked_senders", &self.seen_nonces.len())
            .finish()
    }
}

impl GossipTransport {
    /// Build a transport around a signing capability. The local node's
    /// identity is derived from the signer's initial public key and
    /// stays stable across key rotations.
    pub fn new(
        signer: Box<dyn Signer>,
        verifier: Box<dyn Verifier>,
        config: GossipConfig,
    ) -> Self {
        let local_id = NodeId::from_public_key(&signer.public_key());
        Self {
            local_id,
            signer,
            verifier,
            current_epoch: 0,
            seen_nonces: HashMap::new(),
            recent: HashMap::new(),
            ledger: ReputationLedger::new(config.quarantine_window),
            config,
        }
    }

    /// This node's identity.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The local epoch counter.
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Current public key bytes.
    pub fn public_key(&self) -> Vec<u8> {
        self.signer.public_key()
    }

    /// Sign a payload into a replay-protected envelope. A caller-supplied
    /// nonce wins over the default microsecond-clock nonce.
    pub fn sign(
        &self,
        msg_type: MessageType,
        payload: Value,
        nonce: Option<u64>,
    ) -> Result<SignedEnvelope> {
        let mut envelope = SignedEnvelope::unsigned(
            msg_type,
            self.local_id,
            nonce.unwrap_or_else(micros_nonce),
            self.current_epoch,
            payload,
            self.signer.public_key(),
        );
        envelope.signature = self.signer.sign(&envelope.signing_bytes()?);
        Ok(envelope)
    }

    /// Verify an inbound envelope.
    ///
    /// Check order is fixed: quarantine, rate limit, replay, stale
    /// epoch, signature. The quarantine check has no side effects; every
    /// later rejection penalizes the sender, and acceptance rewards it
    /// and records the nonce and rate-limit timestamp.
    pub fn verify(&mut self, envelope: &SignedEnvelope) -> std::result::Result<(), VerifyError> {
        let sender = envelope.sender_id;

        let outcome = self.check(envelope);
        match &outcome {
            Ok(()) => {
                self.ledger.record_success(sender);
                self.seen_nonces
                    .entry(sender)
                    .or_default()
                    .entry(envelope.epoch)
                    .or_default()
                    .insert(envelope.nonce);
                self.recent.entry(sender).or_default().push_back(Instant::now());
            }
            Err(reason) => {
                debug!(sender = %sender, %reason, "envelope rejected");
                if let Some(violation) = reason.violation() {
                    self.ledger.record_violation(sender, violation);
                }
            }
        }
        outcome
    }

    fn check(&mut self, envelope: &SignedEnvelope) -> std::result::Result<(), VerifyError> {
        let sender = envelope.sender_id;

        if self.ledger.is_quarantined(&sender) {
            return Err(VerifyError::Quarantined(sender));
        }

        if self.window_count(&sender) >= self.config.rate_limit_per_sec {
            return Err(VerifyError::RateLimited(sender));
        }

        let replayed = self
            .seen_nonces
            .get(&sender)
            .and_then(|epochs| epochs.get(&envelope.epoch))
            .is_some_and(|nonces| nonces.contains(&envelope.nonce));
        if replayed {
            return Err(VerifyError::Replay {
                nonce: envelope.nonce,
                epoch: envelope.epoch,
            });
        }

        // Tolerate at most one epoch of clock or propagation skew. The
        // wire epoch is attacker-controlled, so compare without
        // arithmetic on it.
        if envelope.epoch < self.current_epoch.saturating_sub(1) {
            return Err(VerifyError::StaleEpoch {
                envelope_epoch: envelope.epoch,
                current_epoch: self.current_epoch,
            });
        }

        let Ok(message) = envelope.signing_bytes() else {
            return Err(VerifyError::BadSignature(sender));
        };
        let key_matches_sender = NodeId::from_public_key(&envelope.public_key) == sender;
        if !key_matches_sender
            || !self
                .verifier
                .verify(&envelope.public_key, &message, &envelope.signature)
        {
            return Err(VerifyError::BadSignature(sender));
        }

        Ok(())
    }

    /// Accepted-message count for a sender inside the sliding window.
    fn window_count(&mut self, sender: &NodeId) -> usize {
        let Some(stamps) = self.recent.get_mut(sender) else {
            return 0;
        };
        let cutoff = Instant::now() - RATE_WINDOW;
        while stamps.front().is_some_and(|t| *t < cutoff) {
            stamps.pop_front();
        }
        stamps.len()
    }

    /// Rotate into a new epoch: fresh keypair, and drop anti-replay
    /// state for every epoch except the new current one.
    pub fn rotate_keys(&mut self) -> Result<()> {
        self.current_epoch += 1;
        self.signer.rotate()?;
        let current = self.current_epoch;
        for epochs in self.seen_nonces.values_mut() {
            epochs.retain(|epoch, _| *epoch == current);
        }
        self.seen_nonces.retain(|_, epochs| !epochs.is_empty());
        debug!(epoch = current, "rotated keys");
        Ok(())
    }

    /// Whether a node is currently quarantined (lazily expires).
    pub fn is_quarantined(&mut self, node: &NodeId) -> bool {
        self.ledger.is_quarantined(node)
    }

    /// Reputation score for a node.
    pub fn reputation(&self, node: &NodeId) -> f64 {
        self.ledger.reputation(node)
    }

    /// Nodes currently under quarantine.
    pub fn quarantined_nodes(&self) -> Vec<NodeId> {
        self.ledger.quarantined_nodes()
    }

    /// Whether the sender's traffic should be considered at all:
    /// false once quarantined or once reputation collapses.
    pub fn should_accept_from(&mut self, node: &NodeId) -> bool {
        !self.is_quarantined(node) && self.reputation(node) >= QUARANTINE_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycel_crypto::{Ed25519Signer, Ed25519Verifier};
    use serde_json::json;

    fn transport() -> GossipTransport {
        GossipTransport::new(
            Box::new(Ed25519Signer::generate()),
            Box::new(Ed25519Verifier),
            GossipConfig::default(),
        )
    }

    fn transport_with(config: GossipConfig) -> GossipTransport {
        GossipTransport::new(
            Box::new(Ed25519Signer::generate()),
            Box::new(Ed25519Verifier),
            config,
        )
    }

    #[test]
    fn signed_envelope_verifies() {
        let alice = transport();
        let mut bob = transport();

        let env = alice
            .sign(MessageType::Beacon, json!({"neighbors": []}), None)
            .unwrap();
        assert!(bob.verify(&env).is_ok());
        assert_eq!(bob.reputation(&alice.local_id()), 1.0);
    }

    #[test]
    fn replay_is_rejected_with_detection_message() {
        let alice = transport();
        let mut bob = transport();

        let env = alice.sign(MessageType::Beacon, json!({}), Some(42)).unwrap();
        assert!(bob.verify(&env).is_ok());

        let err = bob.verify(&env).unwrap_err();
        assert_eq!(err, VerifyError::Replay { nonce: 42, epoch: 0 });
        assert!(err.to_string().contains("Replay attack detected"));
        assert!(bob.reputation(&alice.local_id()) < 1.0);
    }

    #[test]
    fn distinct_nonces_are_accepted() {
        let alice = transport();
        let mut bob = transport();

        for nonce in [1u64, 2, 3] {
            let env = alice.sign(MessageType::Beacon, json!({}), Some(nonce)).unwrap();
            assert!(bob.verify(&env).is_ok());
        }
    }

    #[test]
    fn stale_epoch_rejected_even_with_valid_signature() {
        let alice = transport();
        let mut bob = transport();
        bob.rotate_keys().unwrap();
        bob.rotate_keys().unwrap();
        assert_eq!(bob.current_epoch(), 2);

        // Alice is still at epoch 0: two behind, outside the skew budget.
        let env = alice.sign(MessageType::Beacon, json!({}), None).unwrap();
        let err = bob.verify(&env).unwrap_err();
        assert!(matches!(err, VerifyError::StaleEpoch { envelope_epoch: 0, current_epoch: 2 }));
    }

    #[test]
    fn huge_wire_epoch_is_rejected_without_panicking() {
        let alice = transport();
        let mut bob = transport();

        let mut env = alice.sign(MessageType::Beacon, json!({}), None).unwrap();
        env.epoch = u64::MAX;

        // Not stale (it is ahead, not behind), but the tampered epoch
        // no longer matches what was signed.
        assert_eq!(
            bob.verify(&env).unwrap_err(),
            VerifyError::BadSignature(alice.local_id())
        );
    }

    #[test]
    fn one_epoch_of_skew_is_tolerated() {
        let alice = transport();
        let mut bob = transport();
        bob.rotate_keys().unwrap();

        let env = alice.sign(MessageType::Beacon, json!({}), None).unwrap();
        assert!(bob.verify(&env).is_ok());
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let alice = transport();
        let mut bob = transport();

        let mut env = alice.sign(MessageType::Beacon, json!({"hop": 1}), None).unwrap();
        env.payload = json!({"hop": 99});

        let err = bob.verify(&env).unwrap_err();
        assert_eq!(err, VerifyError::BadSignature(alice.local_id()));
        assert!(bob.reputation(&alice.local_id()) < 1.0);
    }

    #[test]
    fn sender_id_must_match_embedded_key() {
        let alice = transport();
        let mut bob = transport();

        let mut env = alice.sign(MessageType::Beacon, json!({}), None).unwrap();
        env.sender_id = NodeId::from_name("impostor");
        // Re-signing is impossible without Alice's key, and the claimed
        // identity no longer matches the embedded public key.
        assert!(matches!(bob.verify(&env), Err(VerifyError::BadSignature(_))));
    }

    #[test]
    fn rate_limit_applies_per_sliding_window() {
        let alice = transport();
        let mut bob = transport_with(GossipConfig {
            rate_limit_per_sec: 3,
            ..GossipConfig::default()
        });

        for nonce in 0..3u64 {
            let env = alice.sign(MessageType::Beacon, json!({}), Some(nonce)).unwrap();
            assert!(bob.verify(&env).is_ok());
        }

        let env = alice.sign(MessageType::Beacon, json!({}), Some(99)).unwrap();
        assert_eq!(
            bob.verify(&env).unwrap_err(),
            VerifyError::RateLimited(alice.local_id())
        );
    }

    #[test]
    fn quarantined_sender_is_dropped_without_further_penalty() {
        let alice = transport();
        let mut bob = transport();

        // Collapse Alice's reputation with replayed envelopes.
        let env = alice.sign(MessageType::Beacon, json!({}), Some(7)).unwrap();
        bob.verify(&env).unwrap();
        for _ in 0..12 {
            let _ = bob.verify(&env);
        }
        assert!(bob.is_quarantined(&alice.local_id()));
        assert!(!bob.should_accept_from(&alice.local_id()));

        let score_before = bob.reputation(&alice.local_id());
        let fresh = alice.sign(MessageType::Beacon, json!({}), Some(8)).unwrap();
        assert_eq!(
            bob.verify(&fresh).unwrap_err(),
            VerifyError::Quarantined(alice.local_id())
        );
        // The quarantine gate itself is side-effect free.
        assert_eq!(bob.reputation(&alice.local_id()), score_before);
    }

    #[test]
    fn rotate_keys_prunes_old_replay_state() {
        let alice = transport();
        let mut bob = transport();

        let env = alice.sign(MessageType::Beacon, json!({}), Some(42)).unwrap();
        assert!(bob.verify(&env).is_ok());

        bob.rotate_keys().unwrap();
        // Epoch-0 nonces were discarded; the same envelope is no longer
        // flagged as a replay (it is within the one-epoch skew budget).
        assert!(bob.verify(&env).is_ok());
    }

    #[test]
    fn rotate_keys_changes_local_key_but_not_identity() {
        let mut alice = transport();
        let id = alice.local_id();
        let key_before = alice.public_key();
        alice.rotate_keys().unwrap();
        assert_eq!(alice.local_id(), id);
        assert_ne!(alice.public_key(), key_before);
        assert_eq!(alice.current_epoch(), 1);
    }
}
