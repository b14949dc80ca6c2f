use std::time::Duration;

/// Configuration for a [`LocalNetwork`](crate::LocalNetwork).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use cosi_transport::LocalNetworkConfig;
/// use std::time::Duration;
///
/// let config = LocalNetworkConfig::new()
///     .inbox_capacity(512)
///     .send_timeout(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct LocalNetworkConfig {
    /// Channel buffer size for each host's inbox.
    pub(crate) inbox_capacity: usize,
    /// Upper bound on a single send; a full inbox never blocks forever.
    pub(crate) send_timeout: Duration,
}

impl Default for LocalNetworkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNetworkConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            inbox_capacity: 256,
            send_timeout: Duration::from_secs(2),
        }
    }

    /// Set the inbox buffer size per host (default: 256, minimum 1).
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    /// Set the per-send timeout (default: 2s).
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}
