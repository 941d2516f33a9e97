//! Full node composition and event loop.
//!
//! [`Node`] wires storage, chain manager, mempool, lottery, and network
//! together. Lock order is fixed: chain, then mempool, then network, and no
//! lock is held across socket I/O. The [`SharedStore`] adapter bridges the
//! RocksDB store (behind a `RwLock` the node also uses for snapshots) to the
//! `ChainStore` boundary the chain manager owns.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tessera_consensus::{AcceptOutcome, ChainError, ChainManager};
use tessera_core::chain_state::{ChainStore, ConnectBlockResult, DisconnectBlockResult};
use tessera_core::constants::{
    MAX_BLOCK_SIZE, MAX_HEADERS_PER_MSG, PRODUCTION_TICK_SECS,
};
use tessera_core::crypto::KeyPair;
use tessera_core::error::{MempoolError, TesseraError};
use tessera_core::genesis;
use tessera_core::mempool::{Accepted, Mempool};
use tessera_core::script::p2pkh_script;
use tessera_core::types::{
    Amount, Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry,
};
use tessera_lottery::clustering::SubnetTracker;
use tessera_lottery::producer::{self, SlotResult};
use tessera_lottery::proof::seal_block;
use tessera_lottery::registry::ParticipantRecord;
use tessera_network::locator::{build_locator, find_fork_height};
use tessera_network::{InvItem, InvKind, Locator, Message, NetworkEvent, NetworkNode, PeerId};

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// How many block hashes one `getblocks` answer may carry.
const MAX_BLOCKS_PER_INV: u64 = 500;

/// Errors surfaced during node construction and operation.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("data directory locked by another instance: {0}")]
    LockContention(PathBuf),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] TesseraError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive data-directory lock. Removed on drop.
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: PathBuf) -> Result<Self, NodeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(NodeError::LockContention(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Adapter giving the chain manager exclusive-looking access to a store the
/// node also reads for snapshot persistence.
struct SharedStore(Arc<RwLock<RocksStore>>);

impl ChainStore for SharedStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, TesseraError> {
        self.0.write().connect_block(block, height)
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, TesseraError> {
        self.0.write().disconnect_tip()
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, TesseraError> {
        self.0.read().get_utxo(outpoint)
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), TesseraError> {
        self.0.read().chain_tip()
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, TesseraError> {
        self.0.read().get_block_header(hash)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, TesseraError> {
        self.0.read().get_block(hash)
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, TesseraError> {
        self.0.read().get_block_hash(height)
    }

    fn get_transaction(&self, txid: &Hash256) -> Result<Option<(Transaction, Hash256)>, TesseraError> {
        self.0.read().get_transaction(txid)
    }

    fn utxo_count(&self) -> usize {
        self.0.read().utxo_count()
    }

    fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    fn total_utxo_value(&self) -> Result<i64, TesseraError> {
        self.0.read().total_utxo_value()
    }

    fn flush(&self) -> Result<(), TesseraError> {
        self.0.read().flush()
    }
}

/// Approximate runtime counters; never consulted for consensus.
#[derive(Default)]
pub struct NodeMetrics {
    pub blocks_connected: AtomicU64,
    pub reorgs: AtomicU64,
    pub mempool_size: AtomicU64,
    pub peer_count: AtomicU64,
}

/// Aggregate answer for `getparticipationinfo`.
#[derive(Debug, Clone)]
pub struct ParticipationInfo {
    pub participants: u64,
    pub eligible: u64,
    pub total_staked: Amount,
    /// Expected seconds between blocks while at least one participant is
    /// eligible; `None` when the lottery cannot produce.
    pub expected_block_time_secs: Option<u64>,
    pub peer_count: usize,
}

/// The full node.
pub struct Node {
    chain: RwLock<ChainManager>,
    mempool: Mutex<Mempool>,
    store: Arc<RwLock<RocksStore>>,
    network: Option<NetworkNode>,
    events: Option<tokio::sync::Mutex<mpsc::UnboundedReceiver<NetworkEvent>>>,
    subnets: Mutex<SubnetTracker>,
    /// Peers admitted past the subnet cap, with the address they were
    /// counted under; refused peers never enter.
    admitted_peers: Mutex<HashMap<PeerId, IpAddr>>,
    stake_key: Option<KeyPair>,
    config: NodeConfig,
    pub metrics: NodeMetrics,
    shutdown_tx: watch::Sender<bool>,
    _lock: LockFile,
}

impl Node {
    /// Boot a node with networking.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let mut config = config;
        if let Some(secret) = config.stake_secret {
            // Advertise the lottery identity so remote subnet caps can
            // apply the veteran bypass.
            config.network.participant_key =
                KeyPair::from_secret_bytes(secret).public_key().to_bytes();
        }
        let mut node = Self::build(config.clone())?;

        let (network, events) = NetworkNode::start(config.network.clone())
            .await
            .map_err(NodeError::Io)?;
        // Warm the dialer from the persisted address pool.
        match node.store.read().load_peer_addresses() {
            Ok(addresses) if !addresses.is_empty() => {
                info!(count = addresses.len(), "loaded peer address pool");
                network.add_addresses(addresses);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not load peer address pool"),
        }
        network.set_best_height(node.chain.read().best_height());

        node.network = Some(network);
        node.events = Some(tokio::sync::Mutex::new(events));
        Ok(Arc::new(node))
    }

    /// Boot a node without P2P, for tests and offline maintenance.
    pub fn without_network(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        Ok(Arc::new(Self::build(config)?))
    }

    fn build(config: NodeConfig) -> Result<Self, NodeError> {
        let lock = LockFile::acquire(config.lock_path())?;

        let store = Arc::new(RwLock::new(RocksStore::open(config.db_path())?));

        // Sanity-log the persisted participant snapshot; the registry itself
        // is rebuilt from blocks, which stay the source of truth.
        match store.read().load_participants() {
            Ok(snapshot) if !snapshot.is_empty() => {
                info!(count = snapshot.len(), "participant snapshot present")
            }
            _ => {}
        }

        let genesis_block = config
            .genesis
            .clone()
            .unwrap_or_else(|| genesis::genesis_block(&config.params));
        let chain = ChainManager::new(
            config.params.clone(),
            Box::new(SharedStore(Arc::clone(&store))),
            genesis_block,
        )?;

        let stake_key = config.stake_secret.map(KeyPair::from_secret_bytes);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            chain: RwLock::new(chain),
            mempool: Mutex::new(Mempool::with_defaults()),
            store,
            network: None,
            events: None,
            subnets: Mutex::new(SubnetTracker::new()),
            admitted_peers: Mutex::new(HashMap::new()),
            stake_key,
            config,
            metrics: NodeMetrics::default(),
            shutdown_tx,
            _lock: lock,
        })
    }

    // --- read surface (RPC and tests) ---

    pub fn best_block_hash(&self) -> Hash256 {
        self.chain.read().best_hash()
    }

    pub fn block_count(&self) -> u64 {
        self.chain.read().best_height()
    }

    pub fn get_block(&self, hash: &Hash256) -> Option<Block> {
        self.chain.read().get_block(hash)
    }

    pub fn get_block_hash(&self, height: u64) -> Option<Hash256> {
        self.chain.read().get_block_hash(height)
    }

    pub fn main_chain_height_of(&self, hash: &Hash256) -> Option<u64> {
        self.chain.read().main_chain_height_of(hash)
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Option<(Transaction, Hash256)> {
        self.chain.read().get_transaction(txid)
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.chain.read().get_utxo(outpoint)
    }

    pub fn utxo_count(&self) -> usize {
        self.chain.read().utxo_count()
    }

    pub fn mempool_info(&self) -> (usize, usize, Amount) {
        let mempool = self.mempool.lock();
        (mempool.len(), mempool.total_bytes(), mempool.total_fees())
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> bool {
        self.mempool.lock().contains(txid)
    }

    pub fn peer_count(&self) -> usize {
        self.network.as_ref().map_or(0, |n| n.peer_count())
    }

    /// The P2P listener's bound address, when networking is up.
    pub fn listen_addr(&self) -> Option<std::net::SocketAddr> {
        self.network.as_ref().and_then(|n| n.local_addr())
    }

    /// Dial a peer.
    pub fn dial(&self, addr: std::net::SocketAddr) {
        if let Some(network) = &self.network {
            network.dial(addr);
        }
    }

    pub fn participation_info(&self) -> ParticipationInfo {
        let chain = self.chain.read();
        let height = chain.best_height() + 1;
        let registry = chain.registry();
        let eligible = registry.eligible_count(height, chain.params());
        ParticipationInfo {
            participants: registry.len() as u64,
            eligible,
            total_staked: registry.total_staked(),
            expected_block_time_secs: (eligible > 0).then_some(PRODUCTION_TICK_SECS),
            peer_count: self.peer_count(),
        }
    }

    /// Whether the advertised identity is a registered participant whose
    /// stake age clears the veteran threshold (ten maturity windows), which
    /// bypasses the subnet entry cap.
    fn peer_is_veteran(&self, participant_key: &[u8; 32]) -> bool {
        if participant_key == &[0u8; 32] {
            return false;
        }
        let chain = self.chain.read();
        let height = chain.best_height() + 1;
        chain
            .registry()
            .get(participant_key)
            .is_some_and(|record| record.is_veteran(height, chain.params()))
    }

    /// Seed a genesis-time participant (test and chain-spec use).
    pub fn bootstrap_participant(&self, record: ParticipantRecord, stake_outpoint: OutPoint) {
        self.chain.write().bootstrap_participant(record, stake_outpoint);
    }

    // --- write surface ---

    /// Validate and integrate a block, penalizing the relaying peer on
    /// consensus faults.
    pub fn process_block(
        &self,
        block: &Block,
        from: Option<PeerId>,
    ) -> Result<AcceptOutcome, ChainError> {
        let outcome = {
            let mut chain = self.chain.write();
            chain.accept_block(block)
        };

        match &outcome {
            Ok(AcceptOutcome::Connected { hash, height }) => {
                {
                    let mut mempool = self.mempool.lock();
                    mempool.remove_confirmed_block(block);
                    self.metrics.mempool_size.store(mempool.len() as u64, Ordering::Relaxed);
                }
                self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                if let Some(network) = &self.network {
                    network.set_best_height(*height);
                    network.broadcast(Message::Inv(vec![InvItem::block(*hash)]));
                }
            }
            Ok(AcceptOutcome::Reorganized { hash, height, connected, returned_txs, .. }) => {
                self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);
                {
                    let chain = self.chain.read();
                    let mut mempool = self.mempool.lock();
                    for connected_hash in connected {
                        if let Some(connected_block) = chain.get_block(connected_hash) {
                            mempool.remove_confirmed_block(&connected_block);
                        }
                    }
                    // Old-branch transactions re-enter through normal
                    // admission; whatever fails is dropped.
                    let best_height = chain.best_height();
                    for tx in returned_txs {
                        let _ = mempool.accept(
                            tx.clone(),
                            |op: &OutPoint| chain.get_utxo(op),
                            best_height,
                        );
                    }
                    self.metrics.mempool_size.store(mempool.len() as u64, Ordering::Relaxed);
                }
                self.metrics.blocks_connected.fetch_add(connected.len() as u64, Ordering::Relaxed);
                if let Some(network) = &self.network {
                    network.set_best_height(*height);
                    network.broadcast(Message::Inv(vec![InvItem::block(*hash)]));
                }
            }
            Ok(AcceptOutcome::OrphanParent { missing, .. }) => {
                debug!(%missing, "requesting ancestry for orphan block");
                if let Some(network) = &self.network {
                    let message = Message::GetBlocks(self.chain_locator());
                    match from {
                        Some(peer) => network.send_to(peer, message),
                        None => network.broadcast(message),
                    }
                }
            }
            Ok(AcceptOutcome::SideChain { .. }) | Ok(AcceptOutcome::AlreadyKnown { .. }) => {}
            Err(e) if e.is_consensus_fault() => {
                warn!(error = %e, "rejecting bad block");
                if let (Some(network), Some(peer)) = (&self.network, from) {
                    network.disconnect(peer, true);
                }
            }
            Err(e) => warn!(error = %e, "block not processed"),
        }

        outcome
    }

    /// Admit a transaction to the mempool and announce it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Accepted, MempoolError> {
        let accepted = {
            let chain = self.chain.read();
            let best_height = chain.best_height();
            let mut mempool = self.mempool.lock();
            let result = mempool.accept(tx, |op: &OutPoint| chain.get_utxo(op), best_height);
            self.metrics.mempool_size.store(mempool.len() as u64, Ordering::Relaxed);
            result?
        };

        if let (Some(network), Accepted::Pool(txid)) = (&self.network, &accepted) {
            network.broadcast(Message::Inv(vec![InvItem::tx(*txid)]));
        }
        Ok(accepted)
    }

    /// One production-slot attempt. Returns the new block hash on a win
    /// that was accepted.
    pub fn produce_once(&self) -> Option<Hash256> {
        let keypair = self.stake_key.as_ref()?;

        let slot = {
            let chain = self.chain.read();
            let height = chain.best_height() + 1;
            producer::evaluate_slot(
                keypair,
                &chain.best_hash(),
                height,
                chain.registry(),
                chain.params(),
            )
        };
        let SlotResult::Won { output, proof } = slot else {
            return None;
        };

        // Template assembly, sealing, and submission are three separate
        // steps; the tip may move between them and acceptance handles that.
        let template = self.mempool.lock().build_template(MAX_BLOCK_SIZE - 1024);
        let (mut block, height) = self.chain.read().create_block_template(
            p2pkh_script(&keypair.address()),
            &template,
            unix_now(),
        );
        if let Err(e) = seal_block(&mut block, keypair, output, proof) {
            warn!(error = %e, "sealing failed");
            return None;
        }

        let hash = block.header.hash();
        match self.process_block(&block, None) {
            Ok(AcceptOutcome::Connected { .. }) => {
                info!(height, %hash, "produced block");
                Some(hash)
            }
            Ok(outcome) => {
                debug!(?outcome, "produced block not connected");
                None
            }
            Err(e) => {
                warn!(error = %e, "produced block rejected");
                None
            }
        }
    }

    // --- event loop ---

    /// Drive network events, the production tick, and maintenance until
    /// shutdown is triggered.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut production = tokio::time::interval(Duration::from_secs(PRODUCTION_TICK_SECS));
        let mut maintenance = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                event = self.next_event() => match event {
                    Some(event) => self.handle_event(event),
                    None => tokio::time::sleep(Duration::from_secs(1)).await,
                },
                _ = production.tick() => {
                    // Production requires at least one peer: a partitioned
                    // producer would otherwise build a private chain.
                    let connected = self.network.as_ref().is_some_and(|n| n.peer_count() >= 1);
                    if self.config.produce && connected {
                        self.produce_once();
                    }
                }
                _ = maintenance.tick() => {
                    self.mempool.lock().expire_orphans();
                }
            }
        }

        self.drain();
    }

    /// Ask the event loop to stop.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Orderly shutdown: persist snapshots and flush the store.
    fn drain(&self) {
        info!("shutting down");
        if let Some(network) = &self.network {
            let addresses = network.known_addresses();
            if let Err(e) = self.store.read().save_peer_addresses(&addresses) {
                warn!(error = %e, "failed to persist peer addresses");
            }
        }

        let records: Vec<ParticipantRecord> = {
            let chain = self.chain.read();
            chain.registry().iter().cloned().collect()
        };
        if let Err(e) = self.store.read().save_participants(&records) {
            warn!(error = %e, "failed to persist participant snapshot");
        }

        if let Err(e) = self.chain.read().flush() {
            warn!(error = %e, "store flush failed");
        }
    }

    async fn next_event(&self) -> Option<NetworkEvent> {
        match &self.events {
            Some(events) => events.lock().await.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerReady { peer, addr, best_height, participant_key } => {
                let ip = addr.ip();

                // Anti-clustering: a saturated subnet admits no further
                // new entrants; registered veterans bypass the cap.
                let permitted = self.subnets.lock().permits_new_entrant(&ip);
                if !permitted && !self.peer_is_veteran(&participant_key) {
                    warn!(%addr, "subnet saturated; refusing new entrant");
                    if let Some(network) = &self.network {
                        network.disconnect(peer, false);
                    }
                    return;
                }

                self.subnets.lock().record(&ip);
                self.admitted_peers.lock().insert(peer, ip);
                self.metrics.peer_count.store(self.peer_count() as u64, Ordering::Relaxed);
                info!(%addr, best_height, "peer ready");

                // Behind this peer: ask for its ancestry.
                if best_height > self.block_count() {
                    if let Some(network) = &self.network {
                        network.send_to(peer, Message::GetBlocks(self.chain_locator()));
                    }
                }
            }
            NetworkEvent::PeerDisconnected { peer, .. } => {
                // Only admitted peers occupy a subnet slot; a refused
                // peer's disconnect must not free someone else's.
                if let Some(ip) = self.admitted_peers.lock().remove(&peer) {
                    self.subnets.lock().remove(&ip);
                }
                self.metrics.peer_count.store(self.peer_count() as u64, Ordering::Relaxed);
            }
            NetworkEvent::Message { peer, message } => self.handle_message(peer, message),
        }
    }

    fn handle_message(&self, peer: PeerId, message: Message) {
        let Some(network) = &self.network else { return };

        match message {
            Message::Inv(items) => {
                let wanted: Vec<InvItem> = {
                    let chain = self.chain.read();
                    let mempool = self.mempool.lock();
                    items
                        .into_iter()
                        .filter(|item| match item.kind {
                            InvKind::Block => chain.get_block(&item.hash).is_none(),
                            InvKind::Tx => {
                                !mempool.contains(&item.hash)
                                    && chain.get_transaction(&item.hash).is_none()
                            }
                        })
                        .collect()
                };
                if !wanted.is_empty() {
                    network.send_to(peer, Message::GetData(wanted));
                }
            }
            Message::GetData(items) => {
                for item in items {
                    let reply = match item.kind {
                        InvKind::Block => {
                            self.chain.read().get_block(&item.hash).map(Message::Block)
                        }
                        InvKind::Tx => {
                            let from_pool =
                                self.mempool.lock().get(&item.hash).map(|e| e.tx.clone());
                            from_pool
                                .or_else(|| {
                                    self.chain.read().get_transaction(&item.hash).map(|(tx, _)| tx)
                                })
                                .map(Message::Tx)
                        }
                    };
                    if let Some(reply) = reply {
                        network.send_to(peer, reply);
                    }
                }
            }
            Message::Block(block) => {
                let _ = self.process_block(&block, Some(peer));
            }
            Message::Tx(tx) => {
                if let Err(e) = self.submit_transaction(tx) {
                    debug!(error = %e, "peer transaction refused");
                }
            }
            Message::GetBlocks(locator) => {
                let inventory: Vec<InvItem> = {
                    let chain = self.chain.read();
                    let fork = find_fork_height(&locator.have, |hash| {
                        chain.main_chain_height_of(hash)
                    });
                    let best = chain.best_height();
                    (fork + 1..=best.min(fork + MAX_BLOCKS_PER_INV))
                        .filter_map(|height| chain.get_block_hash(height))
                        .take_while(|hash| locator.stop.is_zero() || *hash != locator.stop)
                        .map(InvItem::block)
                        .collect()
                };
                if !inventory.is_empty() {
                    network.send_to(peer, Message::Inv(inventory));
                }
            }
            Message::GetHeaders(locator) => {
                let headers: Vec<BlockHeader> = {
                    let chain = self.chain.read();
                    let fork = find_fork_height(&locator.have, |hash| {
                        chain.main_chain_height_of(hash)
                    });
                    let best = chain.best_height();
                    (fork + 1..=best.min(fork + MAX_HEADERS_PER_MSG as u64))
                        .filter_map(|height| chain.get_block_hash(height))
                        .filter_map(|hash| chain.get_header(&hash))
                        .collect()
                };
                network.send_to(peer, Message::Headers(headers));
            }
            Message::Headers(headers) => {
                // Header-announce: fetch the bodies we lack.
                let wanted: Vec<InvItem> = {
                    let chain = self.chain.read();
                    headers
                        .iter()
                        .map(|header| header.hash())
                        .filter(|hash| chain.get_block(hash).is_none())
                        .map(InvItem::block)
                        .collect()
                };
                if !wanted.is_empty() {
                    network.send_to(peer, Message::GetData(wanted));
                }
            }
            // Handshake and keepalive traffic is handled inside the
            // network service.
            Message::Version(_) | Message::Verack | Message::Addr(_) | Message::Ping(_)
            | Message::Pong(_) => {}
        }
    }

    fn chain_locator(&self) -> Locator {
        let chain = self.chain.read();
        Locator {
            have: build_locator(chain.best_height(), |height| chain.get_block_hash(height)),
            stop: Hash256::ZERO,
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::constants::COIN;
    use tessera_core::params::ChainParams;

    fn test_config(dir: &tempfile::TempDir) -> NodeConfig {
        NodeConfig {
            data_dir: dir.path().to_path_buf(),
            params: ChainParams::regtest(),
            produce: true,
            stake_secret: Some([0x21; 32]),
            ..NodeConfig::default()
        }
    }

    fn staked_node(dir: &tempfile::TempDir) -> Arc<Node> {
        let config = test_config(dir);
        let node = Node::without_network(config).unwrap();

        let kp = KeyPair::from_secret_bytes([0x21; 32]);
        node.bootstrap_participant(
            ParticipantRecord {
                address: kp.address(),
                stake_amount: ChainParams::regtest().min_stake,
                stake_height: 0,
                public_key: kp.public_key().to_bytes(),
            },
            OutPoint::new(Hash256([0xEE; 32]), 0),
        );
        node
    }

    #[test]
    fn boots_with_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let node = staked_node(&dir);
        assert_eq!(node.block_count(), 0);
        assert!(!node.best_block_hash().is_zero());
        assert_eq!(node.utxo_count(), 1);
    }

    #[test]
    fn lock_file_prevents_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let _node = staked_node(&dir);

        let err = Node::without_network(test_config(&dir)).unwrap_err();
        assert!(matches!(err, NodeError::LockContention(_)));
    }

    #[test]
    fn lock_file_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _node = staked_node(&dir);
        }
        // First instance gone; a new one may start.
        let node = Node::without_network(test_config(&dir)).unwrap();
        assert_eq!(node.block_count(), 0);
    }

    #[test]
    fn produce_once_extends_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let node = staked_node(&dir);

        // Sole eligible participant: every slot wins.
        let hash = node.produce_once().expect("sole participant must win");
        assert_eq!(node.block_count(), 1);
        assert_eq!(node.best_block_hash(), hash);
        assert_eq!(node.metrics.blocks_connected.load(Ordering::Relaxed), 1);

        node.produce_once().expect("second slot");
        assert_eq!(node.block_count(), 2);
    }

    #[test]
    fn produced_blocks_persist_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let best = {
            let node = staked_node(&dir);
            node.produce_once().unwrap();
            node.produce_once().unwrap();
            node.drain();
            node.best_block_hash()
        };

        let node = staked_node(&dir);
        assert_eq!(node.block_count(), 2);
        assert_eq!(node.best_block_hash(), best);
    }

    #[test]
    fn participation_info_reports_registry() {
        let dir = tempfile::tempdir().unwrap();
        let node = staked_node(&dir);

        let info = node.participation_info();
        assert_eq!(info.participants, 1);
        assert_eq!(info.eligible, 1);
        assert_eq!(info.total_staked, ChainParams::regtest().min_stake);
        assert_eq!(info.expected_block_time_secs, Some(PRODUCTION_TICK_SECS));
        assert_eq!(info.peer_count, 0);
    }

    #[test]
    fn submit_transaction_rejects_unknown_inputs_as_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let node = staked_node(&dir);

        let tx = Transaction {
            version: 1,
            inputs: vec![tessera_core::types::TxInput {
                prevout: OutPoint::new(Hash256([9; 32]), 0),
                script_sig: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![tessera_core::types::TxOutput {
                value: COIN,
                script_pubkey: vec![0x51],
            }],
            locktime: 0,
        };
        match node.submit_transaction(tx).unwrap() {
            Accepted::Orphan(_) => {}
            other => panic!("expected orphan, got {other:?}"),
        }
        let (count, _, _) = node.mempool_info();
        assert_eq!(count, 0);
    }

    // --- anti-clustering on the admission path ---

    fn ready_event(peer: PeerId, host: u8, participant_key: [u8; 32]) -> NetworkEvent {
        NetworkEvent::PeerReady {
            peer,
            addr: format!("10.0.0.{host}:19333").parse().unwrap(),
            best_height: 0,
            participant_key,
        }
    }

    #[test]
    fn subnet_cap_refuses_third_new_entrant() {
        // Nonzero maturity: nobody's stake is veteran-aged yet.
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.params.stake_maturity = 10;
        let node = Node::without_network(config).unwrap();

        node.handle_event(ready_event(1, 1, [0; 32]));
        node.handle_event(ready_event(2, 2, [0; 32]));
        node.handle_event(ready_event(3, 3, [0; 32]));

        // The third same-subnet entrant was refused and never counted.
        assert_eq!(node.subnets.lock().peer_count(), 2);
    }

    #[test]
    fn veteran_participant_bypasses_subnet_cap() {
        // Regtest maturity is zero, so the bootstrapped stake clears the
        // ten-maturity veteran threshold immediately.
        let dir = tempfile::tempdir().unwrap();
        let node = staked_node(&dir);
        let veteran_key = KeyPair::from_secret_bytes([0x21; 32]).public_key().to_bytes();

        node.handle_event(ready_event(1, 1, [0; 32]));
        node.handle_event(ready_event(2, 2, [0; 32]));

        // Saturated subnet: the registered veteran still gets in.
        node.handle_event(ready_event(3, 3, veteran_key));
        assert_eq!(node.subnets.lock().peer_count(), 3);

        // An identityless fourth entrant does not.
        node.handle_event(ready_event(4, 4, [0; 32]));
        assert_eq!(node.subnets.lock().peer_count(), 3);

        // Nor does an identity the registry has never seen.
        node.handle_event(ready_event(5, 5, [0x77; 32]));
        assert_eq!(node.subnets.lock().peer_count(), 3);
    }

    #[test]
    fn refused_peer_disconnect_does_not_free_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.params.stake_maturity = 10;
        let node = Node::without_network(config).unwrap();

        node.handle_event(ready_event(1, 1, [0; 32]));
        node.handle_event(ready_event(2, 2, [0; 32]));
        node.handle_event(ready_event(3, 3, [0; 32])); // refused

        // The refused peer's eventual disconnect must not decrement an
        // admitted peer's subnet slot.
        node.handle_event(NetworkEvent::PeerDisconnected {
            peer: 3,
            addr: "10.0.0.3:19333".parse().unwrap(),
        });
        assert_eq!(node.subnets.lock().peer_count(), 2);

        // An admitted peer's disconnect does free its slot.
        node.handle_event(NetworkEvent::PeerDisconnected {
            peer: 2,
            addr: "10.0.0.2:19333".parse().unwrap(),
        });
        assert_eq!(node.subnets.lock().peer_count(), 1);
        node.handle_event(ready_event(6, 6, [0; 32]));
        assert_eq!(node.subnets.lock().peer_count(), 2);
    }
}
