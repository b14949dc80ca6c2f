use std::time::Duration;

/// Configuration for a [`Node`](crate::Node).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use cosi_protocol::NodeConfig;
/// use std::time::Duration;
///
/// let config = NodeConfig::new()
///     .round_time(Duration::from_millis(200))
///     .heartbeat_timeout(Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Fan-in budget per level of subtree height.
    pub(crate) round_time: Duration,
    /// Fixed fan-in budget added on top of the height-scaled part.
    pub(crate) round_overhead: Duration,
    /// View-change vote budget per hop.
    pub(crate) view_change_timeout: Duration,
    /// Parent silence that triggers a view change. `None` disables the watch.
    pub(crate) heartbeat_timeout: Option<Duration>,
    /// Bound on concurrently open rounds.
    pub(crate) max_outstanding_rounds: usize,
    /// Channel buffer size for events surfaced to the application.
    pub(crate) event_buffer: usize,
    /// Use a reproducible nonce stream (simulations only).
    pub(crate) deterministic_nonces: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            round_time: Duration::from_secs(1),
            round_overhead: Duration::from_millis(500),
            view_change_timeout: Duration::from_secs(2),
            heartbeat_timeout: None,
            max_outstanding_rounds: 64,
            event_buffer: 256,
            deterministic_nonces: false,
        }
    }

    /// Defaults, then overrides from `COSI_ROUND_TIME_MS` and
    /// `COSI_HEARTBEAT_MS` when set to a valid integer.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(ms) = env_millis("COSI_ROUND_TIME_MS") {
            config.round_time = ms;
        }
        if let Some(ms) = env_millis("COSI_HEARTBEAT_MS") {
            config.heartbeat_timeout = Some(ms);
        }
        config
    }

    /// Set the per-level fan-in budget (default: 1s).
    pub fn round_time(mut self, d: Duration) -> Self {
        self.round_time = d;
        self
    }

    /// Set the fixed fan-in overhead (default: 500ms).
    pub fn round_overhead(mut self, d: Duration) -> Self {
        self.round_overhead = d;
        self
    }

    /// Set the per-hop view-change vote budget (default: 2s).
    pub fn view_change_timeout(mut self, d: Duration) -> Self {
        self.view_change_timeout = d;
        self
    }

    /// Enable the root liveness watch (default: disabled).
    pub fn heartbeat_timeout(mut self, d: Duration) -> Self {
        self.heartbeat_timeout = Some(d);
        self
    }

    /// Set the outstanding round bound (default: 64, minimum 1).
    pub fn max_outstanding_rounds(mut self, n: usize) -> Self {
        self.max_outstanding_rounds = n.max(1);
        self
    }

    /// Set the event channel capacity (default: 256, minimum 1).
    pub fn event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = n.max(1);
        self
    }

    /// Derive nonces from name and key only, without a random salt.
    pub fn deterministic_nonces(mut self, enabled: bool) -> Self {
        self.deterministic_nonces = enabled;
        self
    }

    /// Fan-in budget for a node whose subtree has the given height.
    pub fn round_timeout(&self, height: usize) -> Duration {
        self.round_time * height as u32 + self.round_overhead
    }

    /// Vote budget for a node `depth` hops below the proposed root.
    pub fn view_change_wait(&self, hosts: usize, depth: u32) -> Duration {
        let hops = (hosts as u32).saturating_sub(depth).max(1);
        self.view_change_timeout * hops
    }

    /// How long an accepted but unconfirmed change stays pending: the
    /// proposer's own vote budget plus one hop of slack.
    pub fn view_change_confirm_wait(&self, hosts: usize) -> Duration {
        self.view_change_wait(hosts, 0) + self.view_change_timeout
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a millisecond count");
            None
        }
    }
}
