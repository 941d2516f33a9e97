//! Node configuration.

use std::path::PathBuf;

use tessera_core::constants::DEFAULT_RPC_PORT;
use tessera_core::params::ChainParams;
use tessera_network::NetworkConfig;

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// P2P network configuration.
    pub network: NetworkConfig,
    /// Consensus parameters of the chain this node follows.
    pub params: ChainParams,
    /// Log level filter string (e.g. "info", "tessera_node=debug").
    pub log_filter: String,
    /// Whether to run the local block-production tick.
    pub produce: bool,
    /// Secret key material for the producer, when production is enabled.
    pub stake_secret: Option<[u8; 32]>,
    /// Genesis override; `None` uses the default genesis for `params`.
    /// Deployments with genesis-time allocations supply their own block.
    pub genesis: Option<tessera_core::types::Block>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tessera");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            network: NetworkConfig::default(),
            params: ChainParams::mainnet(),
            log_filter: "info".to_string(),
            produce: false,
            stake_secret: None,
            genesis: None,
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Path of the exclusive instance lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".lock")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rpc_settings() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(cfg.rpc_bind, "127.0.0.1");
        assert_eq!(cfg.rpc_addr(), format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
    }

    #[test]
    fn derived_paths() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/tessera-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/tessera-test/chaindata"));
        assert_eq!(cfg.lock_path(), PathBuf::from("/tmp/tessera-test/.lock"));
    }

    #[test]
    fn production_disabled_by_default() {
        let cfg = NodeConfig::default();
        assert!(!cfg.produce);
        assert!(cfg.stake_secret.is_none());
    }
}
