//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use ess_chain::{Genesis, TxPoolConfig};
use ess_ethash::EthashConfig;
use ess_types::{Address, SyncMode};

use crate::logging::LogFormat;
use crate::NodeError;

/// Gas price oracle parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoConfig {
    /// Number of recent blocks sampled.
    #[serde(default = "default_gpo_blocks")]
    pub blocks: usize,
    /// Percentile of the sampled prices suggested.
    #[serde(default = "default_gpo_percentile")]
    pub percentile: u8,
    /// Suggested price when no block carries transactions; falls back to
    /// the node gas price when unset.
    #[serde(default)]
    pub default: Option<u64>,
}

impl Default for GpoConfig {
    fn default() -> Self {
        Self {
            blocks: default_gpo_blocks(),
            percentile: default_gpo_percentile(),
            default: None,
        }
    }
}

/// Configuration of an [`EssNode`](crate::EssNode).
///
/// Loaded from a TOML file via [`NodeConfig::from_toml_file`] or built
/// programmatically (e.g. for tests). Scalar settings come first so the
/// serialized form keeps tables at the end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `full`, `fast` or `light`. Light mode is rejected by the full node.
    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_network_id")]
    pub network_id: u64,

    /// Minimum gas price for mining a transaction, in wei.
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,

    /// Account credited with mined blocks; zero means unset.
    #[serde(default)]
    pub etherbase: Address,

    /// Peer capacity of the p2p server.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Maximum percentage of time spent serving light clients; 0 disables.
    #[serde(default)]
    pub light_serv: u32,

    /// Peer slots reserved for light clients.
    #[serde(default = "default_light_peers")]
    pub light_peers: usize,

    /// Database cache size in MiB.
    #[serde(default = "default_database_cache")]
    pub database_cache: usize,

    #[serde(default = "default_database_handles")]
    pub database_handles: u32,

    /// Trie node cache size in MiB.
    #[serde(default = "default_trie_cache")]
    pub trie_cache: usize,

    /// Seconds between trie flushes.
    #[serde(default = "default_trie_timeout")]
    pub trie_timeout_secs: u64,

    /// Keep every historical state.
    #[serde(default)]
    pub no_pruning: bool,

    /// Extra data put in mined blocks; empty selects a client identifier.
    #[serde(default)]
    pub extra_data: String,

    #[serde(default)]
    pub skip_bc_version_check: bool,

    #[serde(default)]
    pub enable_preimage_recording: bool,

    /// Data directory; `None` runs on an ephemeral in-memory database.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub gpo: GpoConfig,

    #[serde(default)]
    pub ethash: EthashConfig,

    #[serde(default)]
    pub txpool: TxPoolConfig,

    /// Genesis to initialise an empty database with; main network when
    /// unset.
    #[serde(default)]
    pub genesis: Option<Genesis>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_gpo_blocks() -> usize {
    20
}

fn default_gpo_percentile() -> u8 {
    60
}

fn default_network_id() -> u64 {
    1
}

fn default_gas_price() -> u64 {
    18_000_000_000
}

fn default_max_peers() -> usize {
    25
}

fn default_light_peers() -> usize {
    100
}

fn default_database_cache() -> usize {
    768
}

fn default_database_handles() -> u32 {
    512
}

fn default_trie_cache() -> usize {
    256
}

fn default_trie_timeout() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
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
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            network_id: default_network_id(),
            gas_price: default_gas_price(),
            etherbase: Address::ZERO,
            max_peers: default_max_peers(),
            light_serv: 0,
            light_peers: default_light_peers(),
            database_cache: default_database_cache(),
            database_handles: default_database_handles(),
            trie_cache: default_trie_cache(),
            trie_timeout_secs: default_trie_timeout(),
            no_pruning: false,
            extra_data: String::new(),
            skip_bc_version_check: false,
            enable_preimage_recording: false,
            data_dir: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            enable_metrics: false,
            gpo: GpoConfig::default(),
            ethash: EthashConfig::default(),
            txpool: TxPoolConfig::default(),
            genesis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_consensus::PowMode;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.network_id, config.network_id);
        assert_eq!(parsed.gas_price, config.gas_price);
        assert_eq!(parsed.sync_mode, SyncMode::Fast);
        assert_eq!(parsed.txpool, config.txpool);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network_id, 1);
        assert_eq!(config.light_peers, 100);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.ethash.pow_mode, PowMode::Normal);
        assert!(config.etherbase.is_zero());
        assert!(config.genesis.is_none());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            sync_mode = "full"
            network_id = 42
            light_serv = 50

            [ethash]
            pow_mode = "test"

            [gpo]
            default = 7
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.sync_mode, SyncMode::Full);
        assert_eq!(config.network_id, 42);
        assert_eq!(config.light_serv, 50);
        assert_eq!(config.ethash.pow_mode, PowMode::Test);
        assert_eq!(config.gpo.default, Some(7));
        assert_eq!(config.gpo.blocks, 20);
    }

    #[test]
    fn unknown_sync_mode_is_kept() {
        let config = NodeConfig::from_toml_str(r#"sync_mode = "warp""#).unwrap();
        assert_eq!(config.sync_mode, SyncMode::Invalid("warp".into()));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/ess.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
