//! The mesh session: one object owning all shared control-plane state.
//!
//! The peer registry, pheromone table and protection state are owned
//! here and nowhere else - subsystems get them by reference through the
//! documented operations, never as process-wide globals. Each periodic
//! loop runs as its own tokio task; every shared table sits behind a
//! mutex so per-pair and per-event mutations stay atomic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mycel_crypto::{Ed25519Signer, Ed25519Verifier, NodeId, Signer, Verifier};
use mycel_gossip::{GossipConfig, GossipTransport, MessageType, SignedEnvelope};
use mycel_quorum::{CriticalEvent, Evidence, QuorumValidator};
use mycel_routing::{StigmergyRouter, TagRule};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MeshConfig;
use crate::guard::{BeaconError, ByzantineGuard, ProtectionStats};
use crate::monitor::{spawn_evaporation_loop, spawn_health_loop};
use crate::registry::{PeerRegistry, PeerState};
use crate::{Error, Result};

/// Body of a FAILURE_REPORT envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReportPayload {
    pub failed_node: NodeId,
    pub evidence: Evidence,
}

/// Handles to a session's running loops.
pub struct MeshHandles {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshHandles {
    /// Signal both loops to stop and wait for the in-flight tick to
    /// finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// A running mesh node's control plane.
pub struct MeshSession {
    config: MeshConfig,
    local_id: NodeId,
    guard: Arc<Mutex<ByzantineGuard>>,
    router: Arc<Mutex<StigmergyRouter>>,
    registry: Arc<Mutex<PeerRegistry>>,
}

impl MeshSession {
    /// Create a session with a freshly generated Ed25519 identity.
    pub fn new(config: MeshConfig) -> Self {
        Self::with_capabilities(
            config,
            Box::new(Ed25519Signer::generate()),
            Box::new(Ed25519Verifier),
        )
    }

    /// Create a session around explicit signing capabilities. This is
    /// the constructor to use with a non-default signature backend.
    pub fn with_capabilities(
        config: MeshConfig,
        signer: Box<dyn Signer>,
        verifier: Box<dyn Verifier>,
    ) -> Self {
        let transport = GossipTransport::new(
            signer,
            verifier,
            GossipConfig {
                rate_limit_per_sec: config.rate_limit_per_sec,
                quarantine_window: config.quarantine_window,
            },
        );
        let local_id = transport.local_id();

        let mut validator = QuorumValidator::new(config.total_nodes, config.quorum_threshold);
        if let Some(ttl) = config.pending_event_ttl {
            validator = validator.with_pending_ttl(ttl);
        }

        info!(
            node = %local_id,
            total_nodes = config.total_nodes,
            quorum = validator.quorum_size(),
            "mesh session created"
        );

        Self {
            config,
            local_id,
            guard: Arc::new(Mutex::new(ByzantineGuard::new(transport, validator))),
            router: Arc::new(Mutex::new(StigmergyRouter::new())),
            registry: Arc::new(Mutex::new(PeerRegistry::new())),
        }
    }

    /// This node's identity.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Spawn the health-monitor and evaporation loops.
    pub fn start(&self) -> MeshHandles {
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = vec![
            spawn_health_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.guard),
                self.config.health_check_interval,
                self.config.peer_timeout,
                stop_rx.clone(),
            ),
            spawn_evaporation_loop(
                Arc::clone(&self.router),
                self.config.decay_interval,
                stop_rx,
            ),
        ];
        MeshHandles {
            stop: stop_tx,
            tasks,
        }
    }

    // --- Gossip entrypoints -------------------------------------------------

    /// Sign a liveness beacon with the local neighbor view.
    pub async fn sign_beacon(&self, neighbors: &[NodeId]) -> Result<SignedEnvelope> {
        self.guard.lock().await.sign_beacon(neighbors)
    }

    /// Handle an inbound beacon.
    ///
    /// A verified beacon refreshes the sender in the registry (reviving
    /// a locally-dead peer) and reinforces the direct route to it.
    /// Returns `Ok(false)` when the sender is a validated failure:
    /// quorum-confirmed death outranks a single beacon, so the envelope
    /// is ignored without even being verified.
    pub async fn handle_beacon(
        &self,
        envelope: &SignedEnvelope,
    ) -> std::result::Result<bool, BeaconError> {
        let sender = envelope.sender_id;
        {
            let mut guard = self.guard.lock().await;
            if guard.is_validated_failure(&sender) {
                debug!(node = %sender, "beacon from validated-failed node ignored");
                return Ok(false);
            }
            guard.verify_beacon(envelope)?;
        }

        let registered = self.registry.lock().await.record_beacon(sender);
        if registered {
            self.router.lock().await.reinforce(sender, sender, true);
        }
        Ok(registered)
    }

    /// Sign a failure report for broadcast to the mesh.
    pub async fn sign_failure_report(
        &self,
        failed_node: NodeId,
        evidence: Evidence,
    ) -> Result<SignedEnvelope> {
        let payload = serde_json::to_value(FailureReportPayload {
            failed_node,
            evidence,
        })?;
        let guard = self.guard.lock().await;
        Ok(guard
            .transport()
            .sign(MessageType::FailureReport, payload, None)?)
    }

    /// Handle another node's failure report: verify the envelope, then
    /// count the sender as one countersigning validator. Returns the
    /// event's validated flag after this signature.
    pub async fn handle_failure_report(&self, envelope: &SignedEnvelope) -> Result<bool> {
        if envelope.msg_type != MessageType::FailureReport {
            return Err(Error::UnexpectedMessageType(envelope.msg_type));
        }

        let report: FailureReportPayload = {
            let mut guard = self.guard.lock().await;
            guard.transport_mut().verify(envelope)?;
            serde_json::from_value(envelope.payload.clone())?
        };

        let validated = {
            let mut guard = self.guard.lock().await;
            guard.report_node_failure(report.failed_node, report.evidence);
            guard.validate_node_failure(
                report.failed_node,
                envelope.sender_id,
                envelope.signature.clone(),
            )?
        };

        if validated {
            self.confirm_failure(report.failed_node).await;
        }
        Ok(validated)
    }

    /// Rotate the local keypair into a new epoch.
    pub async fn rotate_keys(&self) -> Result<()> {
        Ok(self.guard.lock().await.transport_mut().rotate_keys()?)
    }

    // --- Protection surface -------------------------------------------------

    /// Report a locally observed node failure.
    pub async fn report_node_failure(&self, node: NodeId, evidence: Evidence) -> CriticalEvent {
        self.guard.lock().await.report_node_failure(node, evidence)
    }

    /// Countersign a node failure. On quorum, the node is excluded from
    /// the registry and the routing table for good.
    pub async fn validate_node_failure(
        &self,
        target: NodeId,
        validator_id: NodeId,
        signature: Vec<u8>,
    ) -> Result<bool> {
        let validated = self
            .guard
            .lock()
            .await
            .validate_node_failure(target, validator_id, signature)?;
        if validated {
            self.confirm_failure(target).await;
        }
        Ok(validated)
    }

    async fn confirm_failure(&self, node: NodeId) {
        self.registry.lock().await.mark_validated_failed(node);
        self.router.lock().await.purge_node(&node);
    }

    pub async fn is_node_quarantined(&self, node: &NodeId) -> bool {
        self.guard.lock().await.is_quarantined(node)
    }

    pub async fn node_reputation(&self, node: &NodeId) -> f64 {
        self.guard.lock().await.reputation(node)
    }

    pub async fn should_accept_message(&self, sender: &NodeId) -> bool {
        self.guard.lock().await.should_accept_message(sender)
    }

    pub async fn protection_stats(&self) -> ProtectionStats {
        self.guard.lock().await.protection_stats()
    }

    // --- Routing surface ----------------------------------------------------

    /// Feed a transmission outcome into the router.
    pub async fn reinforce(&self, dest: NodeId, next_hop: NodeId, success: bool) {
        self.router.lock().await.reinforce(dest, next_hop, success);
    }

    pub async fn best_route(&self, dest: &NodeId) -> Option<NodeId> {
        self.router.lock().await.best_route(dest)
    }

    pub async fn redundant_paths(&self, dest: &NodeId, limit: usize) -> Vec<NodeId> {
        self.router.lock().await.redundant_paths(dest, limit)
    }

    pub async fn update_policies(
        &self,
        rules: Vec<TagRule>,
        peer_tags: HashMap<NodeId, HashSet<String>>,
    ) {
        self.router.lock().await.update_policies(rules, peer_tags);
    }

    // --- Registry surface ---------------------------------------------------

    pub async fn peer_state(&self, node: &NodeId) -> Option<PeerState> {
        self.registry.lock().await.state(node)
    }

    pub async fn active_peers(&self) -> Vec<NodeId> {
        self.registry.lock().await.active_peers()
    }
}
