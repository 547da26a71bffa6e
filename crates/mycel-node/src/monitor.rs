//! Periodic maintenance loops: health checking and pheromone decay.
//!
//! Both loops follow the same contract: tick, log any tick error, and
//! re-arm. A single bad tick must never take the loop down. Shutdown is
//! cooperative through a watch channel - the current tick always
//! finishes before the task exits.

use std::sync::Arc;
use std::time::Duration;

use mycel_quorum::Evidence;
use mycel_routing::StigmergyRouter;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::guard::ByzantineGuard;
use crate::registry::PeerRegistry;

/// One health-monitor pass over the peer registry.
///
/// Quarantined peers are skipped: their silence is already explained.
/// Every alive peer silent past `peer_timeout` transitions to locally
/// dead, leaves the active set, and is reported for quorum validation
/// exactly once - an already-dead peer is not re-reported.
///
/// Returns the peers newly reported this tick.
pub fn health_tick(
    registry: &mut PeerRegistry,
    guard: &mut ByzantineGuard,
    peer_timeout: Duration,
) -> Vec<mycel_crypto::NodeId> {
    let mut reported = Vec::new();

    for stale in registry.stale_peers(peer_timeout) {
        if guard.is_quarantined(&stale.node) {
            continue;
        }
        if guard.is_validated_failure(&stale.node) {
            continue;
        }

        registry.mark_locally_dead(&stale.node);

        let elapsed_secs = stale.elapsed.as_secs_f64();
        let evidence = Evidence::PeerTimeout {
            last_seen: mycel_gossip::envelope::unix_now() - elapsed_secs,
            elapsed_secs,
        };
        guard.report_node_failure(stale.node, evidence);

        debug!(
            node = %stale.node,
            elapsed_secs,
            "peer timed out; reported for quorum validation"
        );
        reported.push(stale.node);
    }

    reported
}

/// Spawn the health-monitor loop.
pub fn spawn_health_loop(
    registry: Arc<Mutex<PeerRegistry>>,
    guard: Arc<Mutex<ByzantineGuard>>,
    interval: Duration,
    peer_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut registry = registry.lock().await;
                    let mut guard = guard.lock().await;
                    health_tick(&mut registry, &mut guard, peer_timeout);
                    let evicted = guard.evict_expired_events();
                    if evicted > 0 {
                        warn!(evicted, "dropped pending events past their TTL");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("health monitor stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn the pheromone evaporation loop.
pub fn spawn_evaporation_loop(
    router: Arc<Mutex<StigmergyRouter>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    router.lock().await.evaporate();
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("evaporation loop stopping");
                        break;
                    }
                }
            }
        }
    })
}
