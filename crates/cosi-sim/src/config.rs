//! Simulator settings: a JSON file layered over `NodeConfig::from_env()`.
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use cosi_protocol::NodeConfig;
use cosi_transport::LocalNetworkConfig;
use serde::Deserialize;

/// Every field is optional; unset fields keep the library defaults.
///
/// ```json
/// { "round_time_ms": 200, "heartbeat_ms": 3000, "inbox_capacity": 512 }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub round_time_ms: Option<u64>,
    pub round_overhead_ms: Option<u64>,
    pub view_change_timeout_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub max_outstanding_rounds: Option<usize>,
    pub inbox_capacity: Option<usize>,
    pub send_timeout_ms: Option<u64>,
}

impl SimConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig::from_env().deterministic_nonces(true);
        if let Some(ms) = self.round_time_ms {
            config = config.round_time(Duration::from_millis(ms));
        }
        if let Some(ms) = self.round_overhead_ms {
            config = config.round_overhead(Duration::from_millis(ms));
        }
        if let Some(ms) = self.view_change_timeout_ms {
            config = config.view_change_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.heartbeat_ms {
            config = config.heartbeat_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = self.max_outstanding_rounds {
            config = config.max_outstanding_rounds(n);
        }
        config
    }

    pub fn net_config(&self) -> LocalNetworkConfig {
        let mut config = LocalNetworkConfig::new();
        if let Some(n) = self.inbox_capacity {
            config = config.inbox_capacity(n);
        }
        if let Some(ms) = self.send_timeout_ms {
            config = config.send_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: SimConfig = serde_json::from_str(r#"{"round_time_ms": 200}"#).unwrap();
        assert_eq!(config.round_time_ms, Some(200));
        assert!(config.heartbeat_ms.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<SimConfig>(r#"{"round_tme_ms": 200}"#).is_err());
    }

    #[test]
    fn no_path_means_defaults() {
        let config = SimConfig::load(None).unwrap();
        assert!(config.round_time_ms.is_none());
    }
}
