//! Stigmergy router: pheromone trails over next hops.
//!
//! Routing preference is learned, not configured. Every successful
//! transmission through a next hop deposits pheromone on the
//! `(destination, next_hop)` pair; failures halve it; a periodic
//! evaporation tick decays every trail so stale knowledge disappears on
//! its own. Path selection simply reads the strongest surviving trails.
//!
//! Pair lifecycle: unknown → alive (score ≥ [`PHEROMONE_MIN`]) →
//! pruned (score < [`PRUNE_FLOOR`]). A pruned pair only comes back
//! through a fresh `reinforce`, which recreates it at baseline.

use std::collections::HashMap;
use std::time::Instant;

use mycel_crypto::NodeId;
use tracing::{debug, trace};

use crate::policy::{TagPolicy, TagRule};

/// Multiplier applied to every score per evaporation tick.
pub const DECAY_RATE: f64 = 0.9;

/// Additive deposit for a successful transmission.
pub const BOOST: f64 = 10.0;

/// Baseline score for a fresh pair; also the eligibility floor for
/// path selection.
pub const PHEROMONE_MIN: f64 = 1.0;

/// Scores below this are removed from the table.
pub const PRUNE_FLOOR: f64 = 0.1;

/// Default number of paths returned by redundant-path queries.
pub const DEFAULT_PATH_LIMIT: usize = 3;

/// One pheromone trail toward a destination through a next hop.
#[derive(Debug, Clone)]
pub struct RoutePheromone {
    pub next_hop: NodeId,
    pub score: f64,
    pub last_updated: Instant,
}

/// Snapshot of table shape, for operators.
#[derive(Debug, Clone, Copy)]
pub struct RouterStats {
    pub destinations: usize,
    pub tracked_pairs: usize,
}

impl std::fmt::Display for RouterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Router: {} destinations, {} tracked pairs",
            self.destinations, self.tracked_pairs
        )
    }
}

/// The adaptive routing table.
#[derive(Debug, Default)]
pub struct StigmergyRouter {
    /// destination → next_hop → trail.
    table: HashMap<NodeId, HashMap<NodeId, RoutePheromone>>,
    policy: TagPolicy,
}

impl StigmergyRouter {
    /// Router with an empty (allow-all) policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with an initial policy.
    pub fn with_policy(policy: TagPolicy) -> Self {
        Self {
            table: HashMap::new(),
            policy,
        }
    }

    /// Feed back a transmission outcome for `(dest, next_hop)`.
    ///
    /// ACL-gated: a denied destination is a silent no-op. Success adds
    /// [`BOOST`]; failure halves the score. A pair unknown to the table
    /// is created at [`PHEROMONE_MIN`] before the outcome is applied.
    pub fn reinforce(&mut self, dest: NodeId, next_hop: NodeId, success: bool) {
        if !self.policy.is_allowed(&dest) {
            return;
        }

        let trail = self
            .table
            .entry(dest)
            .or_default()
            .entry(next_hop)
            .or_insert_with(|| RoutePheromone {
                next_hop,
                score: PHEROMONE_MIN,
                last_updated: Instant::now(),
            });

        if success {
            trail.score += BOOST;
        } else {
            trail.score *= 0.5;
        }
        trail.last_updated = Instant::now();

        trace!(dest = %dest, next_hop = %next_hop, success, score = trail.score, "reinforced");
    }

    /// Strongest eligible next hop toward `dest`, if any.
    pub fn best_route(&self, dest: &NodeId) -> Option<NodeId> {
        self.redundant_paths(dest, 1).into_iter().next()
    }

    /// Up to `limit` eligible next hops toward `dest`, strongest first.
    /// Only trails at or above [`PHEROMONE_MIN`] qualify, enabling
    /// make-before-break multi-path routing.
    pub fn redundant_paths(&self, dest: &NodeId, limit: usize) -> Vec<NodeId> {
        let Some(hops) = self.table.get(dest) else {
            return Vec::new();
        };

        let mut eligible: Vec<&RoutePheromone> = hops
            .values()
            .filter(|trail| trail.score >= PHEROMONE_MIN)
            .collect();
        eligible.sort_by(|a, b| b.score.total_cmp(&a.score));
        eligible
            .into_iter()
            .take(limit)
            .map(|trail| trail.next_hop)
            .collect()
    }

    /// Current score for a pair, if tracked.
    pub fn score(&self, dest: &NodeId, next_hop: &NodeId) -> Option<f64> {
        self.table
            .get(dest)
            .and_then(|hops| hops.get(next_hop))
            .map(|trail| trail.score)
    }

    /// Decay every trail by [`DECAY_RATE`], pruning pairs that fall
    /// below [`PRUNE_FLOOR`] and destinations left with no pairs.
    /// Returns the number of pruned pairs.
    pub fn evaporate(&mut self) -> usize {
        let mut pruned = 0;
        self.table.retain(|dest, hops| {
            hops.retain(|_, trail| {
                trail.score *= DECAY_RATE;
                if trail.score < PRUNE_FLOOR {
                    pruned += 1;
                    false
                } else {
                    true
                }
            });
            if hops.is_empty() {
                trace!(dest = %dest, "destination evaporated away");
                false
            } else {
                true
            }
        });

        if pruned > 0 {
            debug!(pruned, "evaporation pruned stale trails");
        }
        pruned
    }

    /// Drop every trail toward and through a node. Used when a failure
    /// is quorum-confirmed.
    pub fn purge_node(&mut self, node: &NodeId) {
        self.table.remove(node);
        self.table.retain(|_, hops| {
            hops.remove(node);
            !hops.is_empty()
        });
    }

    /// Replace the ACL rule list and the peer tag mapping.
    pub fn update_policies(
        &mut self,
        rules: Vec<TagRule>,
        peer_tags: HashMap<NodeId, std::collections::HashSet<String>>,
    ) {
        self.policy.replace(rules, peer_tags);
    }

    /// Table shape snapshot.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            destinations: self.table.len(),
            tracked_pairs: self.table.values().map(HashMap::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Action;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn node(n: u8) -> NodeId {
        NodeId::from_bytes([n; 32])
    }

    #[test]
    fn success_boosts_from_baseline() {
        let mut router = StigmergyRouter::new();
        router.reinforce(node(1), node(2), true);
        assert_eq!(router.score(&node(1), &node(2)), Some(PHEROMONE_MIN + BOOST));
    }

    #[test]
    fn five_successes_then_one_failure() {
        let mut router = StigmergyRouter::new();
        for _ in 0..5 {
            router.reinforce(node(1), node(2), true);
        }
        assert_eq!(router.score(&node(1), &node(2)), Some(51.0));

        router.reinforce(node(1), node(2), false);
        assert_eq!(router.score(&node(1), &node(2)), Some(25.5));
    }

    #[test]
    fn redundant_paths_sorted_and_limited() {
        let mut router = StigmergyRouter::new();
        // Three hops with distinct strengths, one too weak to qualify.
        router.reinforce(node(1), node(2), true); // 11.0
        for _ in 0..3 {
            router.reinforce(node(1), node(3), true); // 31.0
        }
        for _ in 0..2 {
            router.reinforce(node(1), node(4), true); // 21.0
        }
        router.reinforce(node(1), node(5), true); // 11.0
        for _ in 0..4 {
            router.reinforce(node(1), node(5), false); // 11.0 * 0.5^4 = 0.6875
        }
        assert!(router.score(&node(1), &node(5)).unwrap() < PHEROMONE_MIN);

        let paths = router.redundant_paths(&node(1), 3);
        assert_eq!(paths, vec![node(3), node(4), node(2)]);

        assert_eq!(router.redundant_paths(&node(1), 2), vec![node(3), node(4)]);
        assert_eq!(router.best_route(&node(1)), Some(node(3)));
    }

    #[test]
    fn best_route_none_for_unknown_destination() {
        let router = StigmergyRouter::new();
        assert_eq!(router.best_route(&node(9)), None);
    }

    #[test]
    fn evaporate_decays_and_prunes() {
        let mut router = StigmergyRouter::new();
        router.reinforce(node(1), node(2), true); // 11.0
        router.reinforce(node(1), node(3), true);
        for _ in 0..7 {
            router.reinforce(node(1), node(3), false); // 11.0 * 0.5^7 ≈ 0.0859
        }

        let pruned = router.evaporate();
        assert_eq!(pruned, 1);
        let remaining = router.score(&node(1), &node(2)).unwrap();
        assert!((remaining - 11.0 * DECAY_RATE).abs() < 1e-9);
        assert_eq!(router.score(&node(1), &node(3)), None);
    }

    #[test]
    fn destination_with_no_pairs_is_removed() {
        let mut router = StigmergyRouter::new();
        router.reinforce(node(1), node(2), true);
        for _ in 0..7 {
            router.reinforce(node(1), node(2), false);
        }
        router.evaporate();
        assert_eq!(router.stats().destinations, 0);
        assert_eq!(router.stats().tracked_pairs, 0);
    }

    #[test]
    fn pruned_pair_recreated_at_baseline() {
        let mut router = StigmergyRouter::new();
        router.reinforce(node(1), node(2), true);
        for _ in 0..8 {
            router.reinforce(node(1), node(2), false);
        }
        router.evaporate();
        assert_eq!(router.score(&node(1), &node(2)), None);

        router.reinforce(node(1), node(2), true);
        assert_eq!(router.score(&node(1), &node(2)), Some(PHEROMONE_MIN + BOOST));
    }

    #[test]
    fn denied_destination_is_a_silent_noop() {
        let mut router = StigmergyRouter::new();
        router.update_policies(
            vec![TagRule::new("*", "edge", Action::Allow)],
            HashMap::new(),
        );
        router.reinforce(node(1), node(2), true);
        assert_eq!(router.score(&node(1), &node(2)), None);
        assert_eq!(router.stats().tracked_pairs, 0);
    }

    #[test]
    fn allowed_destination_passes_acl() {
        let mut router = StigmergyRouter::new();
        let dest = node(1);
        router.update_policies(
            vec![TagRule::new("*", "edge", Action::Allow)],
            HashMap::from([(dest, HashSet::from(["edge".to_string()]))]),
        );
        router.reinforce(dest, node(2), true);
        assert_eq!(router.score(&dest, &node(2)), Some(PHEROMONE_MIN + BOOST));
    }

    #[test]
    fn purge_node_removes_both_directions() {
        let mut router = StigmergyRouter::new();
        router.reinforce(node(1), node(2), true);
        router.reinforce(node(2), node(3), true);
        router.reinforce(node(4), node(2), true);

        router.purge_node(&node(2));
        assert_eq!(router.best_route(&node(2)), None);
        assert_eq!(router.score(&node(1), &node(2)), None);
        assert_eq!(router.score(&node(4), &node(2)), None);
    }

    proptest! {
        #[test]
        fn paths_are_bounded_sorted_and_eligible(
            outcomes in prop::collection::vec((0u8..6, any::<bool>()), 0..120),
            limit in 0usize..6,
        ) {
            let mut router = StigmergyRouter::new();
            let dest = node(99);
            for (hop, success) in outcomes {
                router.reinforce(dest, node(hop), success);
            }

            let paths = router.redundant_paths(&dest, limit);
            prop_assert!(paths.len() <= limit);

            let scores: Vec<f64> = paths
                .iter()
                .map(|hop| router.score(&dest, hop).unwrap())
                .collect();
            for pair in scores.windows(2) {
                prop_assert!(pair[0] >= pair[1]);
            }
            for score in scores {
                prop_assert!(score >= PHEROMONE_MIN);
            }
        }
    }
}
