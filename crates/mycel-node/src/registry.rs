//! Peer liveness registry.
//!
//! Per-peer state machine:
//!
//! ```text
//! Alive --(silent past timeout)--> LocallyDead --(quorum)--> ValidatedFailed
//!   ^                                   |
//!   +------(fresh beacon)---------------+
//! ```
//!
//! `ValidatedFailed` is terminal: a quorum-confirmed failure outranks a
//! later beacon, so a failed node can never talk its way back in.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mycel_crypto::NodeId;
use tracing::debug;

/// Liveness state for a tracked peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Alive,
    LocallyDead,
    ValidatedFailed,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => write!(f, "ALIVE"),
            Self::LocallyDead => write!(f, "LOCALLY_DEAD"),
            Self::ValidatedFailed => write!(f, "VALIDATED_FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerRecord {
    last_seen: Instant,
    state: PeerState,
}

/// A peer flagged stale by [`PeerRegistry::stale_peers`].
#[derive(Debug, Clone, Copy)]
pub struct StalePeer {
    pub node: NodeId,
    pub last_seen: Instant,
    pub elapsed: Duration,
}

/// Tracks last-seen times and liveness states for known peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<NodeId, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verified beacon from a peer. Returns `false` if the
    /// peer is already a validated failure, in which case the beacon
    /// changes nothing. A locally-dead peer recovers to alive.
    pub fn record_beacon(&mut self, node: NodeId) -> bool {
        self.record_seen_at(node, Instant::now())
    }

    /// Like [`record_beacon`](Self::record_beacon) with an explicit
    /// observation time, for replaying telemetry.
    pub fn record_seen_at(&mut self, node: NodeId, seen: Instant) -> bool {
        match self.peers.get_mut(&node) {
            Some(record) if record.state == PeerState::ValidatedFailed => false,
            Some(record) => {
                if record.state == PeerState::LocallyDead {
                    debug!(node = %node, "peer recovered via fresh beacon");
                }
                record.state = PeerState::Alive;
                record.last_seen = seen;
                true
            }
            None => {
                self.peers.insert(
                    node,
                    PeerRecord {
                        last_seen: seen,
                        state: PeerState::Alive,
                    },
                );
                true
            }
        }
    }

    /// Current state of a peer, if tracked.
    pub fn state(&self, node: &NodeId) -> Option<PeerState> {
        self.peers.get(node).map(|record| record.state)
    }

    /// Alive peers whose silence exceeds `timeout`.
    pub fn stale_peers(&self, timeout: Duration) -> Vec<StalePeer> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|(_, record)| record.state == PeerState::Alive)
            .filter_map(|(node, record)| {
                let elapsed = now.duration_since(record.last_seen);
                (elapsed > timeout).then_some(StalePeer {
                    node: *node,
                    last_seen: record.last_seen,
                    elapsed,
                })
            })
            .collect()
    }

    /// Transition a peer to locally dead (removing it from the active
    /// set). No effect on validated failures.
    pub fn mark_locally_dead(&mut self, node: &NodeId) {
        if let Some(record) = self.peers.get_mut(node) {
            if record.state == PeerState::Alive {
                record.state = PeerState::LocallyDead;
            }
        }
    }

    /// Terminal transition: the failure was quorum-confirmed.
    pub fn mark_validated_failed(&mut self, node: NodeId) {
        self.peers
            .entry(node)
            .and_modify(|record| record.state = PeerState::ValidatedFailed)
            .or_insert(PeerRecord {
                last_seen: Instant::now(),
                state: PeerState::ValidatedFailed,
            });
    }

    /// Peers currently alive.
    pub fn active_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, record)| record.state == PeerState::Alive)
            .map(|(node, _)| *node)
            .collect()
    }

    /// Number of tracked peers in any state.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
