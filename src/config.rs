// Node configuration
//
// Loaded once at startup from a TOML file. Every key is optional:
//
//   root_node = "10.12.0.1"
//   crypto_piece = "shared"
//   max_rounds = 5
//   hop_chain = ["10.12.0.5", "10.12.0.10", "10.12.0.15", "10.12.0.20"]

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unix time (seconds) to wait for before starting; 0 disables
    pub target_sync: f64,

    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,

    /// Node that originates the first round
    pub root_node: IpAddr,

    /// Shared secret expected in blocks; empty disables the check
    pub crypto_piece: String,

    /// Rounds after which the node terminates
    pub max_rounds: usize,

    /// Local UDP address for inbound packets
    pub listen_addr: SocketAddr,

    /// Router process that receives outbound packets
    pub router_addr: SocketAddr,

    /// Overrides self-IP discovery
    pub self_ip: Option<IpAddr>,

    /// Ordered hop chain used when a query carries no explicit path
    pub hop_chain: Vec<IpAddr>,

    /// Nodes eligible to lead the next round
    pub leader_candidates: Vec<IpAddr>,

    /// Attach `hop_chain` to the queries this node originates, so that hops
    /// follow the originator's chain instead of their own
    pub announce_hop_path: bool,

    pub query_time_limit_secs: i64,
    pub query_number_limit: usize,

    pub first_round_delay_ms: u64,
    pub next_round_delay_ms: u64,

    /// Upper bound of the random delay before answering a query
    pub max_jitter_ms: u64,

    /// Close rounds by time even when no further traffic arrives
    pub deadline_timer: bool,
}

fn manet(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 12, 0, last))
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            target_sync: 0.0,
            log_level: "info".to_string(),
            root_node: manet(1),
            crypto_piece: String::new(),
            max_rounds: 5,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 10000)),
            router_addr: SocketAddr::from(([127, 0, 0, 1], 10001)),
            self_ip: None,
            hop_chain: [5, 10, 15, 20].into_iter().map(manet).collect(),
            leader_candidates: [1, 3, 7, 9, 13, 17, 19].into_iter().map(manet).collect(),
            announce_hop_path: false,
            query_time_limit_secs: 10,
            query_number_limit: 4,
            first_round_delay_ms: 5_000,
            next_round_delay_ms: 3_000,
            max_jitter_ms: 200,
            deadline_timer: true,
        }
    }
}

impl NodeConfig {
    /// Loads and validates the configuration at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_sync.is_finite() {
            return Err(ConfigError::Invalid("target_sync must be a finite unix time".into()));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be greater than 0".into()));
        }
        if self.query_number_limit == 0 {
            return Err(ConfigError::Invalid("query_number_limit must be greater than 0".into()));
        }
        if self.query_time_limit_secs <= 0 {
            return Err(ConfigError::Invalid("query_time_limit_secs must be greater than 0".into()));
        }
        if self.leader_candidates.is_empty() {
            return Err(ConfigError::Invalid("leader_candidates must not be empty".into()));
        }
        Ok(())
    }

    pub fn first_round_delay(&self) -> Duration {
        Duration::from_millis(self.first_round_delay_ms)
    }

    pub fn next_round_delay(&self) -> Duration {
        Duration::from_millis(self.next_round_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = NodeConfig::from_toml("").unwrap();

        assert_eq!(config.root_node, manet(1));
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.hop_chain.len(), 4);
        assert_eq!(config.leader_candidates.len(), 7);
        assert!(config.crypto_piece.is_empty());
        assert!(!config.announce_hop_path);
    }

    #[test]
    fn test_overrides() {
        let raw = r#"
            root_node = "10.12.0.3"
            crypto_piece = "piece"
            max_rounds = 2
            self_ip = "10.12.0.5"
            hop_chain = ["10.12.0.5", "10.12.0.6"]
            announce_hop_path = true
        "#;
        let config = NodeConfig::from_toml(raw).unwrap();

        assert_eq!(config.root_node, manet(3));
        assert_eq!(config.crypto_piece, "piece");
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.self_ip, Some(manet(5)));
        assert_eq!(config.hop_chain, vec![manet(5), manet(6)]);
        assert!(config.announce_hop_path);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(NodeConfig::from_toml("max_rounds = 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(NodeConfig::from_toml("leader_candidates = []"), Err(ConfigError::Invalid(_))));
        assert!(matches!(NodeConfig::from_toml(r#"root_node = "nope""#), Err(ConfigError::Parse(_))));
        assert!(matches!(NodeConfig::from_toml("target_sync = inf"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(NodeConfig::load("/nonexistent/conf.toml"), Err(ConfigError::Io(_))));
    }
}
