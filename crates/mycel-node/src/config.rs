//! Node configuration.

use std::time::Duration;

/// Configuration for a mesh session.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Expected mesh size; fixes the quorum size at construction.
    pub total_nodes: usize,

    /// Fraction of `total_nodes` whose countersignatures make a
    /// critical event authoritative.
    pub quorum_threshold: f64,

    /// Silence after which a peer is considered locally dead.
    pub peer_timeout: Duration,

    /// How often the health monitor scans the peer registry.
    pub health_check_interval: Duration,

    /// How often pheromone trails evaporate.
    pub decay_interval: Duration,

    /// Per-sender gossip rate limit (messages per sliding second).
    pub rate_limit_per_sec: usize,

    /// Quarantine duration after reputation collapse.
    pub quarantine_window: Duration,

    /// Optional eviction horizon for quorum events that never validate.
    /// `None` keeps them pending forever.
    pub pending_event_ttl: Option<Duration>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            total_nodes: 10,
            quorum_threshold: 0.67,
            peer_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(5),
            decay_interval: Duration::from_secs(1),
            rate_limit_per_sec: 100,
            quarantine_window: Duration::from_secs(300),
            pending_event_ttl: None,
        }
    }
}

impl MeshConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            total_nodes: env_parse("MYCEL_TOTAL_NODES", defaults.total_nodes),
            quorum_threshold: env_parse("MYCEL_QUORUM_THRESHOLD", defaults.quorum_threshold),
            peer_timeout: Duration::from_secs(env_parse(
                "MYCEL_PEER_TIMEOUT_SECS",
                defaults.peer_timeout.as_secs(),
            )),
            health_check_interval: Duration::from_secs(env_parse(
                "MYCEL_HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval.as_secs(),
            )),
            decay_interval: Duration::from_secs(env_parse(
                "MYCEL_DECAY_INTERVAL_SECS",
                defaults.decay_interval.as_secs(),
            )),
            rate_limit_per_sec: env_parse("MYCEL_RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            quarantine_window: Duration::from_secs(env_parse(
                "MYCEL_QUARANTINE_WINDOW_SECS",
                defaults.quarantine_window.as_secs(),
            )),
            pending_event_ttl: std::env::var("MYCEL_PENDING_EVENT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
