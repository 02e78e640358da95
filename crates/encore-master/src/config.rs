//! Configuration types for encore-master.
//! Parsed from encore.toml; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use encore_protocol::DEFAULT_PARAMS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub master: MasterSection,
    #[serde(default)]
    pub nodes: NodesSection,
    #[serde(default)]
    pub matchmaking: MatchmakingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSection {
    /// UDP bind address of the node side channel.
    #[serde(default = "default_node_listen_addr")]
    pub node_listen_addr: String,
    /// Capacity of the outbound datagram queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for MasterSection {
    fn default() -> Self {
        Self {
            node_listen_addr: default_node_listen_addr(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesSection {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_window_ms")]
    pub sweep_window_ms: u64,
}

impl Default for NodesSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_window_ms: default_sweep_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingSection {
    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,
    /// First port handed to new server instances on a node.
    #[serde(default = "default_instance_port")]
    pub instance_port: u16,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

impl Default for MatchmakingSection {
    fn default() -> Self {
        Self {
            relay_timeout_ms: default_relay_timeout_ms(),
            instance_port: default_instance_port(),
            code_length: default_code_length(),
        }
    }
}

// Default value functions
fn default_node_listen_addr() -> String {
    "0.0.0.0:2328".into()
}
fn default_outbound_queue() -> usize {
    256
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_PARAMS.sweep_interval_secs
}
fn default_sweep_window_ms() -> u64 {
    DEFAULT_PARAMS.sweep_window_ms
}
fn default_relay_timeout_ms() -> u64 {
    DEFAULT_PARAMS.relay_timeout_ms
}
fn default_instance_port() -> u16 {
    30000
}
fn default_code_length() -> usize {
    5
}

impl MasterConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: MasterConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.master.outbound_queue == 0 {
            anyhow::bail!("master.outbound_queue must be positive");
        }
        if self.nodes.sweep_interval_secs == 0 {
            anyhow::bail!("nodes.sweep_interval_secs must be positive");
        }
        if self.matchmaking.code_length == 0 {
            anyhow::bail!("matchmaking.code_length must be positive");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.nodes.sweep_interval_secs)
    }

    pub fn sweep_window(&self) -> Duration {
        Duration::from_millis(self.nodes.sweep_window_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.matchmaking.relay_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = MasterConfig::default();
        assert_eq!(cfg.master.node_listen_addr, "0.0.0.0:2328");
        assert_eq!(cfg.nodes.sweep_interval_secs, 30);
        assert_eq!(cfg.sweep_window(), Duration::from_millis(5000));
        assert_eq!(cfg.relay_timeout(), Duration::from_millis(6000));
        assert_eq!(cfg.matchmaking.code_length, 5);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[master]
node_listen_addr = "127.0.0.1:4000"

[matchmaking]
relay_timeout_ms = 250
"#;
        let cfg: MasterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.master.node_listen_addr, "127.0.0.1:4000");
        assert_eq!(cfg.master.outbound_queue, 256);
        assert_eq!(cfg.relay_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.matchmaking.instance_port, 30000);
        assert_eq!(cfg.nodes.sweep_window_ms, 5000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg: MasterConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.nodes.sweep_interval_secs, 30);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MasterConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.master.outbound_queue, 256);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encore.toml");
        std::fs::write(&path, "[matchmaking]\ncode_length = 0\n").unwrap();
        assert!(MasterConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut cfg = MasterConfig::default();
        cfg.nodes.sweep_window_ms = 1234;
        let text = cfg.to_toml_string().unwrap();
        let back: MasterConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.nodes.sweep_window_ms, 1234);
    }
}
