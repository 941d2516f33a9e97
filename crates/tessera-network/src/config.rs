//! Network configuration.

use std::net::SocketAddr;

use tessera_core::constants::{DEFAULT_P2P_PORT, MAGIC_BYTES, MAX_CONNECTIONS};

/// Configuration for the P2P service.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Peers dialed at startup and whenever the connection count is low.
    pub seed_peers: Vec<SocketAddr>,
    /// Upper bound on simultaneous connections (inbound plus outbound).
    pub max_connections: usize,
    /// Network magic used in frame headers.
    pub magic: [u8; 4],
    /// Whether to accept inbound connections at all.
    pub listen: bool,
    /// Lottery identity advertised in the `version` handshake; all zeroes
    /// for a non-participating node.
    pub participant_key: [u8; 32],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_P2P_PORT)),
            seed_peers: Vec::new(),
            max_connections: MAX_CONNECTIONS,
            magic: MAGIC_BYTES,
            listen: true,
            participant_key: [0; 32],
        }
    }
}
