//! Per-node configuration, loaded once at startup from a TOML file and
//! passed explicitly to every component that needs it — no process-wide
//! settings singleton.

use serde::{Deserialize, Serialize};
use sopmq_types::SopmqError;
use std::path::Path;

/// Raw TOML shape. `range` is a decimal string because TOML has no native
/// 128-bit integer type.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNodeConfig {
    range: String,
    bind_address: String,
    port: u16,
    #[serde(default)]
    cassandra_seeds: Vec<String>,
    #[serde(default)]
    mq_seeds: Vec<String>,
    #[serde(default = "default_max_message_size")]
    max_message_size: u32,
    /// Shared credential every node in the cluster authenticates its
    /// peer-to-peer RPC connections with; identical on every node's config.
    node_username: String,
    node_password: String,
}

fn default_max_message_size() -> u32 {
    sopmq_protocol::codec::DEFAULT_MAX_MESSAGE_SIZE
}

/// This node's static configuration: its position on the ring, where it
/// binds, and the seeds it uses to find storage and peers.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub range: u128,
    pub bind_address: String,
    pub port: u16,
    pub cassandra_seeds: Vec<String>,
    pub mq_seeds: Vec<String>,
    pub max_message_size: u32,
    pub node_username: String,
    pub node_password: String,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<NodeConfig, SopmqError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SopmqError::ProtocolViolation(format!("reading config: {e}")))?;
        Self::parse(&contents)
    }

    pub fn parse(toml_text: &str) -> Result<NodeConfig, SopmqError> {
        let raw: RawNodeConfig = toml::from_str(toml_text)
            .map_err(|e| SopmqError::ProtocolViolation(format!("parsing config: {e}")))?;

        let range: u128 = raw
            .range
            .parse()
            .map_err(|_| SopmqError::ProtocolViolation(format!("invalid range '{}'", raw.range)))?;

        Ok(NodeConfig {
            range,
            bind_address: raw.bind_address,
            port: raw.port,
            cassandra_seeds: raw.cassandra_seeds,
            mq_seeds: raw.mq_seeds,
            max_message_size: raw.max_message_size,
            node_username: raw.node_username,
            node_password: raw.node_password,
        })
    }

    pub fn bind_socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_text = r#"
            range = "170141183460469231731687303715884105728"
            bind_address = "0.0.0.0"
            port = 7534
            mq_seeds = ["sopmq://node-b:7534"]
            node_username = "sopmq-node"
            node_password = "cluster-secret"
        "#;
        let cfg = NodeConfig::parse(toml_text).unwrap();
        assert_eq!(cfg.range, 1u128 << 127);
        assert_eq!(cfg.port, 7534);
        assert_eq!(cfg.mq_seeds, vec!["sopmq://node-b:7534".to_string()]);
        assert!(cfg.cassandra_seeds.is_empty());
        assert_eq!(cfg.max_message_size, sopmq_protocol::codec::DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(cfg.node_username, "sopmq-node");
        assert_eq!(cfg.node_password, "cluster-secret");
    }

    #[test]
    fn rejects_non_numeric_range() {
        let toml_text = r#"
            range = "not-a-number"
            bind_address = "0.0.0.0"
            port = 7534
            node_username = "sopmq-node"
            node_password = "cluster-secret"
        "#;
        assert!(NodeConfig::parse(toml_text).is_err());
    }

    #[test]
    fn rejects_config_missing_node_credentials() {
        let toml_text = r#"
            range = "0"
            bind_address = "0.0.0.0"
            port = 7534
        "#;
        assert!(NodeConfig::parse(toml_text).is_err());
    }
}
