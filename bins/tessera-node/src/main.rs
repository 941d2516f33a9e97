//! Tessera full node daemon.
//!
//! Boots storage, chain state, mempool, lottery, networking, and the
//! JSON-RPC server, then runs until interrupted.
//!
//! Exit codes: 0 clean shutdown, 1 fatal initialization error, 2 another
//! instance holds the data directory lock.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tessera_core::constants::{DEFAULT_P2P_PORT, DEFAULT_RPC_PORT};
use tessera_core::params::ChainParams;
use tessera_network::NetworkConfig;
use tessera_node_lib::node::NodeError;
use tessera_node_lib::rpc::start_rpc;
use tessera_node_lib::{Node, NodeConfig};
use tracing::{error, info};

/// Tessera full node: blocks by lottery, not by labour.
#[derive(Parser, Debug)]
#[command(name = "tesserad", version, about = "Tessera full node daemon")]
struct Args {
    /// Data directory for chain storage and the instance lock
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// P2P listen port
    #[arg(long, default_value_t = DEFAULT_P2P_PORT)]
    port: u16,

    /// Disable inbound P2P connections
    #[arg(long)]
    no_listen: bool,

    /// RPC server bind address
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// Seed peers to dial (host:port, comma-separated)
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<SocketAddr>,

    /// Log filter (e.g. "info", "tessera_network=debug")
    #[arg(long, default_value = "info")]
    log: String,

    /// Emit JSON-formatted logs
    #[arg(long)]
    log_json: bool,

    /// Enable the local block-production tick
    #[arg(long)]
    produce: bool,

    /// Hex-encoded 32-byte stake secret key (implies --produce)
    #[arg(long)]
    stake_key: Option<String>,

    /// Run against the local regression-test chain
    #[arg(long)]
    regtest: bool,
}

impl Args {
    fn into_config(self) -> Result<(NodeConfig, bool), String> {
        let params = if self.regtest { ChainParams::regtest() } else { ChainParams::mainnet() };

        let data_dir = self.data_dir.unwrap_or_else(|| {
            let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            let suffix = if self.regtest { "tessera-regtest" } else { "tessera" };
            base.join(suffix)
        });

        let stake_secret = match &self.stake_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key).map_err(|_| "stake key is not valid hex")?;
                let secret: [u8; 32] =
                    bytes.try_into().map_err(|_| "stake key must be 32 bytes")?;
                Some(secret)
            }
            None => None,
        };

        let network = NetworkConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            seed_peers: self.seeds,
            magic: params.magic,
            listen: !self.no_listen,
            ..NetworkConfig::default()
        };

        let config = NodeConfig {
            data_dir,
            rpc_bind: self.rpc_bind,
            rpc_port: self.rpc_port,
            network,
            params,
            log_filter: self.log,
            produce: self.produce || stake_secret.is_some(),
            stake_secret,
            genesis: None,
        };
        Ok((config, self.log_json))
    }
}

fn init_logging(filter: &str, json: bool) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_json) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("tesserad: {e}");
            process::exit(1);
        }
    };

    init_logging(&config.log_filter, log_json);

    info!("tesserad v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = %config.data_dir.display(), rpc = %config.rpc_addr(), "starting");

    let node = match Node::new(config.clone()).await {
        Ok(node) => node,
        Err(NodeError::LockContention(path)) => {
            error!(lock = %path.display(), "another instance is running");
            process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "failed to start node");
            process::exit(1);
        }
    };

    info!(
        height = node.block_count(),
        best = %node.best_block_hash(),
        "chain ready"
    );

    let rpc_handle = match start_rpc(node.clone(), &config.rpc_addr()).await {
        Ok(handle) => {
            info!(addr = %config.rpc_addr(), "RPC server listening");
            handle
        }
        Err(e) => {
            error!(error = %e, "failed to start RPC server");
            process::exit(1);
        }
    };

    // The event loop owns the drain path, so it must observe the shutdown
    // trigger rather than being cancelled by it.
    let runner = tokio::spawn({
        let node = node.clone();
        async move { node.run().await }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("interrupt received, shutting down");

    node.trigger_shutdown();
    let _ = runner.await;

    let _ = rpc_handle.stop();
    info!("shutdown complete");
}
