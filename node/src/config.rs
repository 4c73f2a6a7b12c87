//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use keel_crypto::keypair_from_seed;
use keel_network::PeerLimits;
use keel_types::{KeyPair, NetworkId, ProtocolParams, PublicKey};

use crate::{LogFormat, NodeError};

/// Configuration for a keel node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to connect to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Frame magic; falls back to the network's own when unset.
    #[serde(default)]
    pub magic: Option<u32>,

    /// Data directory for ledger storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// LMDB map size in MiB.
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,

    /// Whether to accept inbound peers.
    #[serde(default = "default_true")]
    pub listen: bool,

    /// Port to listen on for P2P connections. 0 picks a free port.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Seed peers as `host:port`.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Outbound connections the node tries to keep open.
    #[serde(default = "default_min_desired_connections")]
    pub min_desired_connections: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_connections_per_address")]
    pub max_connections_per_address: usize,

    /// Memory pool capacity (verified + unverified).
    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,

    /// Target block interval and base of every consensus timer.
    #[serde(default = "default_seconds_per_block")]
    pub seconds_per_block: u64,

    /// Hex-encoded public keys of the genesis validators.
    #[serde(default)]
    pub standby_validators: Vec<String>,

    /// Hex-encoded 32-byte seed of this node's validator key. Without one
    /// the node only follows consensus.
    #[serde(default)]
    pub validator_seed: Option<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to sample node state into the Prometheus registry.
    #[serde(default)]
    pub enable_metrics: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./keel_data")
}

fn default_map_size_mb() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_p2p_port() -> u16 {
    NetworkId::Dev.default_port()
}

fn default_min_desired_connections() -> usize {
    PeerLimits::default().min_desired
}

fn default_max_connections() -> usize {
    PeerLimits::default().max_connections
}

fn default_max_connections_per_address() -> usize {
    PeerLimits::default().max_per_address
}

fn default_mempool_capacity() -> usize {
    ProtocolParams::default().mempool_capacity
}

fn default_seconds_per_block() -> u64 {
    ProtocolParams::default().seconds_per_block
}

fn default_log_format() -> LogFormat {
    LogFormat::Human
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn magic(&self) -> u32 {
        self.magic.unwrap_or_else(|| self.network.magic())
    }

    pub fn map_size(&self) -> usize {
        self.map_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn peer_limits(&self) -> PeerLimits {
        PeerLimits {
            min_desired: self.min_desired_connections,
            max_connections: self.max_connections,
            max_per_address: self.max_connections_per_address,
        }
    }

    /// Protocol parameters for the configured network, with the block
    /// interval and pool capacity taken from this config.
    pub fn protocol_params(&self) -> ProtocolParams {
        let base = match self.network {
            NetworkId::Dev => ProtocolParams::dev_defaults(),
            NetworkId::Live | NetworkId::Test => ProtocolParams::default(),
        };
        ProtocolParams {
            seconds_per_block: self.seconds_per_block,
            mempool_capacity: self.mempool_capacity,
            ..base
        }
    }

    pub fn validator_key(&self) -> Result<Option<KeyPair>, NodeError> {
        let Some(seed) = &self.validator_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(seed.trim())
            .map_err(|e| NodeError::Config(format!("validator seed: {e}")))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            NodeError::Config(format!("validator seed must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Some(keypair_from_seed(&seed)))
    }

    /// Parse the standby validator list.
    ///
    /// A dev network with no configured standby set runs as a single
    /// validator chain signed by `local`.
    pub fn standby_keys(&self, local: Option<&PublicKey>) -> Result<Vec<PublicKey>, NodeError> {
        let keys = self
            .standby_validators
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<PublicKey>()
                    .map_err(|e| NodeError::Config(format!("standby validator {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !keys.is_empty() {
            return Ok(keys);
        }
        match (self.network, local) {
            (NetworkId::Dev, Some(key)) => Ok(vec![*key]),
            _ => Err(NodeError::Config("no standby validators configured".into())),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            magic: None,
            data_dir: default_data_dir(),
            map_size_mb: default_map_size_mb(),
            listen: true,
            port: default_p2p_port(),
            seeds: Vec::new(),
            min_desired_connections: default_min_desired_connections(),
            max_connections: default_max_connections(),
            max_connections_per_address: default_max_connections_per_address(),
            mempool_capacity: default_mempool_capacity(),
            seconds_per_block: default_seconds_per_block(),
            standby_validators: Vec::new(),
            validator_seed: None,
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn limits_survive_a_toml_round_trip(
            min in 0usize..64,
            max in 0usize..512,
            per_address in 1usize..16,
            seconds in 1u64..3_600,
        ) {
            let config = NodeConfig {
                min_desired_connections: min,
                max_connections: max,
                max_connections_per_address: per_address,
                seconds_per_block: seconds,
                ..NodeConfig::default()
            };
            let parsed = NodeConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
            let limits = parsed.peer_limits();
            prop_assert_eq!(limits.min_desired, min);
            prop_assert_eq!(limits.max_connections, max);
            prop_assert_eq!(limits.max_per_address, per_address);
            prop_assert_eq!(parsed.protocol_params().seconds_per_block, seconds);
        }
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.max_connections, config.max_connections);
        assert_eq!(parsed.log_format, LogFormat::Human);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Dev);
        assert_eq!(config.min_desired_connections, 10);
        assert_eq!(config.max_connections, 40);
        assert_eq!(config.max_connections_per_address, 3);
        assert_eq!(config.seconds_per_block, 15);
        assert_eq!(config.magic(), NetworkId::Dev.magic());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            network = "test"
            magic = 1234
            seconds_per_block = 5
            log_format = "json"
            seeds = ["10.0.0.1:20333"]
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Test);
        assert_eq!(config.magic(), 1234);
        assert_eq!(config.protocol_params().seconds_per_block, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.seeds, vec!["10.0.0.1:20333".to_string()]);
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/keel.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn validator_seed_must_be_32_bytes() {
        let mut config = NodeConfig {
            validator_seed: Some("abcd".into()),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validator_key(), Err(NodeError::Config(_))));

        config.validator_seed = Some(hex::encode([7u8; 32]));
        let key = config.validator_key().unwrap().unwrap();
        assert_eq!(key.public, keypair_from_seed(&[7; 32]).public);
    }

    #[test]
    fn empty_standby_set_falls_back_to_local_key_on_dev_only() {
        let local = keypair_from_seed(&[1; 32]).public;
        let dev = NodeConfig::default();
        assert_eq!(dev.standby_keys(Some(&local)).unwrap(), vec![local]);
        assert!(dev.standby_keys(None).is_err());

        let live = NodeConfig {
            network: NetworkId::Live,
            ..NodeConfig::default()
        };
        assert!(live.standby_keys(Some(&local)).is_err());
    }

    #[test]
    fn standby_keys_are_parsed_from_hex() {
        let keys: Vec<PublicKey> = (1..=4u8).map(|i| keypair_from_seed(&[i; 32]).public).collect();
        let config = NodeConfig {
            standby_validators: keys.iter().map(|k| k.to_string()).collect(),
            ..NodeConfig::default()
        };
        assert_eq!(config.standby_keys(None).unwrap(), keys);

        let broken = NodeConfig {
            standby_validators: vec!["zz".into()],
            ..NodeConfig::default()
        };
        assert!(broken.standby_keys(None).is_err());
    }
}
