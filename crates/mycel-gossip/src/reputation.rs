//! Per-sender reputation and quarantine.
//!
//! Reputation is a multiplicative score in `[0, 1]`, starting at 1.0.
//! Protocol violations shrink it (×0.9 each); accepted messages grow it
//! (×1.05, capped at 1.0). When a sender's score drops below
//! [`QUARANTINE_THRESHOLD`] it is quarantined for a fixed window and the
//! transport refuses its traffic until the window lapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mycel_crypto::NodeId;
use tracing::debug;

/// Reputation multiplier applied per violation.
pub const VIOLATION_PENALTY: f64 = 0.9;

/// Reputation multiplier applied per accepted message.
pub const SUCCESS_REWARD: f64 = 1.05;

/// Scores strictly below this trigger quarantine.
pub const QUARANTINE_THRESHOLD: f64 = 0.3;

/// Default quarantine window.
pub const QUARANTINE_WINDOW: Duration = Duration::from_secs(300);

/// Protocol violations that cost reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    RateLimitExceeded,
    ReplayAttack,
    StaleEpoch,
    InvalidSignature,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            Self::ReplayAttack => write!(f, "replay_attack"),
            Self::StaleEpoch => write!(f, "stale_epoch"),
            Self::InvalidSignature => write!(f, "invalid_signature"),
        }
    }
}

/// Tracks reputation scores and active quarantines.
#[derive(Debug)]
pub struct ReputationLedger {
    scores: HashMap<NodeId, f64>,
    quarantine_until: HashMap<NodeId, Instant>,
    window: Duration,
}

impl Default for ReputationLedger {
    fn default() -> Self {
        Self::new(QUARANTINE_WINDOW)
    }
}

impl ReputationLedger {
    /// Create a ledger with a custom quarantine window.
    pub fn new(window: Duration) -> Self {
        Self {
            scores: HashMap::new(),
            quarantine_until: HashMap::new(),
            window,
        }
    }

    /// Current score for a node (1.0 if never seen).
    pub fn reputation(&self, node: &NodeId) -> f64 {
        self.scores.get(node).copied().unwrap_or(1.0)
    }

    /// Penalize a node for a protocol violation. Quarantines it if the
    /// score crosses below the threshold.
    pub fn record_violation(&mut self, node: NodeId, violation: Violation) {
        let score = self.reputation(&node) * VIOLATION_PENALTY;
        self.scores.insert(node, score);

        debug!(node = %node, violation = %violation, score, "reputation penalized");

        if score < QUARANTINE_THRESHOLD {
            let until = Instant::now() + self.window;
            self.quarantine_until.insert(node, until);
            debug!(node = %node, window_secs = self.window.as_secs(), "node quarantined");
        }
    }

    /// Reward a node for an accepted message.
    pub fn record_success(&mut self, node: NodeId) {
        let score = (self.reputation(&node) * SUCCESS_REWARD).min(1.0);
        self.scores.insert(node, score);
    }

    /// Whether the node is currently quarantined. Lazily expires stale
    /// entries when queried.
    pub fn is_quarantined(&mut self, node: &NodeId) -> bool {
        match self.quarantine_until.get(node) {
            Some(until) if Instant::now() >= *until => {
                self.quarantine_until.remove(node);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Nodes currently under quarantine (without expiring entries).
    pub fn quarantined_nodes(&self) -> Vec<NodeId> {
        let now = Instant::now();
        self.quarantine_until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(node, _)| *node)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(n: u8) -> NodeId {
        NodeId::from_bytes([n; 32])
    }

    #[test]
    fn reputation_starts_at_one() {
        let ledger = ReputationLedger::default();
        assert_eq!(ledger.reputation(&node(1)), 1.0);
    }

    #[test]
    fn violations_decay_multiplicatively() {
        let mut ledger = ReputationLedger::default();
        for _ in 0..3 {
            ledger.record_violation(node(1), Violation::InvalidSignature);
        }
        let score = ledger.reputation(&node(1));
        assert!((score - 0.729).abs() < 1e-9);
        assert!(!ledger.is_quarantined(&node(1)));

        // A fourth violation still does not cross the 0.3 threshold.
        ledger.record_violation(node(1), Violation::InvalidSignature);
        assert!((ledger.reputation(&node(1)) - 0.6561).abs() < 1e-9);
        assert!(!ledger.is_quarantined(&node(1)));
    }

    #[test]
    fn quarantine_triggers_below_threshold() {
        let mut ledger = ReputationLedger::default();
        // 0.9^12 ≈ 0.2824 < 0.3; 0.9^11 ≈ 0.3138 ≥ 0.3.
        for _ in 0..11 {
            ledger.record_violation(node(2), Violation::ReplayAttack);
        }
        assert!(!ledger.is_quarantined(&node(2)));
        ledger.record_violation(node(2), Violation::ReplayAttack);
        assert!(ledger.is_quarantined(&node(2)));
        assert_eq!(ledger.quarantined_nodes(), vec![node(2)]);
    }

    #[test]
    fn quarantine_lapses_after_window() {
        let mut ledger = ReputationLedger::new(Duration::ZERO);
        for _ in 0..12 {
            ledger.record_violation(node(3), Violation::RateLimitExceeded);
        }
        // Zero-length window: already expired on the first query.
        assert!(!ledger.is_quarantined(&node(3)));
    }

    #[test]
    fn success_reward_is_capped() {
        let mut ledger = ReputationLedger::default();
        ledger.record_success(node(4));
        assert_eq!(ledger.reputation(&node(4)), 1.0);

        ledger.record_violation(node(4), Violation::StaleEpoch);
        ledger.record_success(node(4));
        let score = ledger.reputation(&node(4));
        assert!((score - 0.945).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn reputation_always_in_unit_interval(ops in prop::collection::vec(any::<bool>(), 0..200)) {
            let mut ledger = ReputationLedger::default();
            let n = node(9);
            for success in ops {
                if success {
                    ledger.record_success(n);
                } else {
                    ledger.record_violation(n, Violation::InvalidSignature);
                }
                let score = ledger.reputation(&n);
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
