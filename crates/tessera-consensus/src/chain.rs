//! The chain manager: block acceptance, tip selection, reorganization.
//!
//! All chain mutation flows through [`ChainManager::accept_block`]. The
//! caller (the node) serializes access behind a writer lock; the participant
//! registry is owned here and only ever touched during connect/disconnect.
//!
//! Failure semantics: structural and consensus failures are permanent (the
//! entry is flagged invalid and [`ChainError::is_consensus_fault`] tells the
//! caller to penalize the relaying peer); a missing parent is transient and
//! surfaces as [`AcceptOutcome::OrphanParent`] so the caller can request
//! ancestry.

use std::collections::HashMap;

use tessera_core::block_validation::{self, validate_header_time};
use tessera_core::chain_state::ChainStore;
use tessera_core::error::{BlockError, ChainStateError, LotteryError, TesseraError};
use tessera_core::mempool::BlockTemplate;
use tessera_core::params::ChainParams;
use tessera_core::types::{
    Amount, Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, UtxoEntry,
};
use tessera_core::utxo::UtxoView;
use tessera_lottery::registry::{ParticipantRecord, ParticipantRegistry};
use tessera_lottery::{self as lottery};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index::{BlockIndexArena, status};
use crate::work;

/// Maximum number of orphan blocks retained while their ancestry is fetched.
const MAX_ORPHAN_BLOCKS: usize = 100;

/// Maximum depth a reorganization may unwind. An operational guard against
/// deep history rewrites, not a consensus rule.
pub const MAX_REORG_DEPTH: u64 = 100;

/// Errors from block acceptance and chain mutation.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Lottery(#[from] LotteryError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error("store: {0}")] Store(String),
}

impl From<TesseraError> for ChainError {
    fn from(e: TesseraError) -> Self {
        match e {
            TesseraError::ChainState(inner) => ChainError::ChainState(inner),
            other => ChainError::Store(other.to_string()),
        }
    }
}

impl ChainError {
    /// Whether this failure indicates a bad block (ban the relaying peer)
    /// rather than a local problem.
    pub fn is_consensus_fault(&self) -> bool {
        matches!(self, ChainError::Block(_) | ChainError::Lottery(_))
    }
}

/// Outcome of [`ChainManager::accept_block`].
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Extended the best chain.
    Connected { hash: Hash256, height: u64 },
    /// Valid but on a lighter branch; retained for future reorganization.
    SideChain { hash: Hash256 },
    /// A heavier branch displaced the old main chain.
    Reorganized {
        hash: Hash256,
        height: u64,
        disconnected: Vec<Hash256>,
        connected: Vec<Hash256>,
        /// Transactions from the old branch absent from the new one, to be
        /// re-admitted to the mempool.
        returned_txs: Vec<Transaction>,
    },
    /// Parent unknown; block held, ancestry should be requested.
    OrphanParent { hash: Hash256, missing: Hash256 },
    /// Block already in the index; idempotent no-op.
    AlreadyKnown { hash: Hash256 },
}

/// Read adapter from [`ChainStore`] to [`UtxoView`].
struct StoreView<'a> {
    store: &'a dyn ChainStore,
}

impl UtxoView for StoreView<'_> {
    fn get_utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.store.get_utxo(outpoint).ok().flatten()
    }
}

/// Owner of the block index, chain store, and participant registry.
pub struct ChainManager {
    params: ChainParams,
    store: Box<dyn ChainStore>,
    index: BlockIndexArena,
    registry: ParticipantRegistry,
    /// Bodies of blocks not currently on the main chain (side branches and
    /// disconnected blocks), keyed by hash.
    side_blocks: HashMap<Hash256, Block>,
    /// Orphan blocks keyed by their missing parent hash.
    orphans: HashMap<Hash256, Vec<Block>>,
    orphan_count: usize,
    /// Handle of the current best tip.
    best: usize,
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl ChainManager {
    /// Open a chain over `store`, connecting `genesis` if the store is
    /// empty, and rebuilding the in-memory index and registry otherwise.
    pub fn new(
        params: ChainParams,
        store: Box<dyn ChainStore>,
        genesis: Block,
    ) -> Result<Self, ChainError> {
        Self::with_clock(params, store, genesis, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    /// As [`new`](Self::new) but with an injected clock for tests.
    pub fn with_clock(
        params: ChainParams,
        mut store: Box<dyn ChainStore>,
        genesis: Block,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Result<Self, ChainError> {
        if store.is_empty() {
            block_validation::validate_block_structure(&genesis)?;
            store.connect_block(&genesis, 0)?;
        }

        let mut manager = Self {
            params,
            store,
            index: BlockIndexArena::new(),
            registry: ParticipantRegistry::new(),
            side_blocks: HashMap::new(),
            orphans: HashMap::new(),
            orphan_count: 0,
            best: 0,
            clock: Box::new(clock),
        };
        manager.rebuild_from_store()?;
        Ok(manager)
    }

    /// Replay the stored main chain into the index and registry.
    fn rebuild_from_store(&mut self) -> Result<(), ChainError> {
        let (tip_height, _) = self.store.chain_tip()?;
        let mut parent = None;

        for height in 0..=tip_height {
            let hash = self
                .store
                .get_block_hash(height)?
                .ok_or_else(|| ChainError::Store(format!("missing hash at height {height}")))?;
            let block = self
                .store
                .get_block(&hash)?
                .ok_or_else(|| ChainStateError::BlockNotFound(hash.to_string()))?;

            let weight = work::block_weight(&block.header, height, &self.params);
            let flags =
                status::HEADER_VALID | status::BODY_VALID | status::CONNECTED | status::MAIN_CHAIN;
            let rank = self.lottery_rank_of(&block, height);
            let handle = self.index.insert(block.header, parent, weight, rank, flags);
            self.registry.apply_block(&block, height);
            parent = Some(handle);
        }

        self.best = parent.expect("store holds at least genesis");
        Ok(())
    }

    // --- read surface ---

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn best_height(&self) -> u64 {
        self.index.get(self.best).height
    }

    pub fn best_hash(&self) -> Hash256 {
        self.index.get(self.best).hash
    }

    /// Cumulative weight of the best chain.
    pub fn best_weight(&self) -> u128 {
        self.index.get(self.best).chain_weight
    }

    pub fn get_block(&self, hash: &Hash256) -> Option<Block> {
        self.store.get_block(hash).ok().flatten()
    }

    pub fn get_block_hash(&self, height: u64) -> Option<Hash256> {
        self.store.get_block_hash(height).ok().flatten()
    }

    pub fn get_header(&self, hash: &Hash256) -> Option<BlockHeader> {
        self.store.get_block_header(hash).ok().flatten()
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Option<(Transaction, Hash256)> {
        self.store.get_transaction(txid).ok().flatten()
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.store.get_utxo(outpoint).ok().flatten()
    }

    /// Height of `hash` if it sits on the current main chain.
    pub fn main_chain_height_of(&self, hash: &Hash256) -> Option<u64> {
        let entry = self.index.get_by_hash(hash)?;
        entry.has(status::MAIN_CHAIN).then_some(entry.height)
    }

    pub fn utxo_count(&self) -> usize {
        self.store.utxo_count()
    }

    pub fn total_utxo_value(&self) -> Amount {
        self.store.total_utxo_value().unwrap_or(0)
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        self.store.flush().map_err(Into::into)
    }

    /// Seed a genesis-time participant. Only meaningful before real stake
    /// transactions flow; deployments allocate these in the chain configuration.
    pub fn bootstrap_participant(&mut self, record: ParticipantRecord, stake_outpoint: OutPoint) {
        self.registry.bootstrap(record, stake_outpoint);
    }

    // --- block acceptance ---

    /// Accept a block received from a peer or produced locally.
    pub fn accept_block(&mut self, block: &Block) -> Result<AcceptOutcome, ChainError> {
        let hash = block.header.hash();

        if self.index.handle_of(&hash).is_some() {
            return Ok(AcceptOutcome::AlreadyKnown { hash });
        }

        // Syntactic limits, coinbase position, duplicate outpoints, merkle.
        block_validation::validate_block_structure(block)?;

        // Locate the parent; absent means orphan, not failure.
        let Some(parent_handle) = self.index.handle_of(&block.header.prev_hash) else {
            let missing = block.header.prev_hash;
            self.hold_orphan(block.clone());
            return Ok(AcceptOutcome::OrphanParent { hash, missing });
        };

        let parent = self.index.get(parent_handle).clone();
        if parent.has(status::INVALID) {
            return Err(BlockError::InvalidAncestor.into());
        }
        let height = parent.height + 1;
        let now = (self.clock)();

        validate_header_time(&block.header, self.index.median_time_past(parent_handle), now)?;

        // Legacy proof-of-work applies below the activation height; the
        // participation proof is checked at connect time, when the registry
        // matches the block's branch.
        if !self.params.participation_active(height) && !work::check_pow(&block.header) {
            return Err(BlockError::InvalidPow.into());
        }

        let weight = work::block_weight(&block.header, height, &self.params);
        let rank = self.lottery_rank_of(block, height);
        let handle =
            self.index.insert(block.header, Some(parent_handle), weight, rank, status::HEADER_VALID);

        let outcome = if block.header.prev_hash == self.index.get(self.best).hash {
            // Extends the best tip: connect directly.
            match self.connect_one(block, height, handle, parent.header.time, now) {
                Ok(()) => {
                    info!(height, %hash, txs = block.transactions.len(), "block connected");
                    Ok(AcceptOutcome::Connected { hash, height })
                }
                Err(e) => {
                    self.index.set_flag(handle, status::INVALID);
                    Err(e)
                }
            }
        } else {
            self.side_blocks.insert(hash, block.clone());
            if self.index.better_tip(handle, self.best) {
                self.reorganize(handle)
            } else {
                debug!(height, %hash, "block retained on side chain");
                Ok(AcceptOutcome::SideChain { hash })
            }
        }?;

        // A newly connected block may be the missing parent of held orphans.
        if matches!(outcome, AcceptOutcome::Connected { .. } | AcceptOutcome::Reorganized { .. }) {
            self.attach_orphans(hash);
        }

        Ok(outcome)
    }

    /// The tie-break rank of a post-activation block: its stake proof's
    /// `(VRF output, producer key)`. `None` below the activation height or
    /// when the proof does not parse (such a block fails verification at
    /// connect time anyway).
    fn lottery_rank_of(&self, block: &Block, height: u64) -> Option<(Hash256, [u8; 32])> {
        if !self.params.participation_active(height) {
            return None;
        }
        lottery::proof::stake_proof_of(block)
            .ok()
            .map(|proof| (proof.vrf_output, proof.public_key))
    }

    /// Validate and connect one block on top of the current store tip.
    fn connect_one(
        &mut self,
        block: &Block,
        height: u64,
        handle: usize,
        parent_time: u32,
        now: u64,
    ) -> Result<(), ChainError> {
        if self.params.participation_active(height) {
            lottery::verify_participation_proof(
                block,
                height,
                parent_time,
                now,
                &self.registry,
                &self.params,
            )?;
        }

        let view = StoreView { store: self.store.as_ref() };
        block_validation::validate_block_body(block, &view, height, self.params.subsidy(height))?;

        self.store.connect_block(block, height)?;
        self.registry.apply_block(block, height);
        self.side_blocks.remove(&block.header.hash());

        self.index.set_flag(
            handle,
            status::BODY_VALID | status::CONNECTED | status::MAIN_CHAIN,
        );
        self.best = handle;
        Ok(())
    }

    /// Disconnect the store tip, rewinding registry and flags. Returns the
    /// disconnected block.
    fn disconnect_one(&mut self) -> Result<Block, ChainError> {
        let entry = self.index.get(self.best).clone();
        let block = self
            .store
            .get_block(&entry.hash)?
            .ok_or_else(|| ChainStateError::BlockNotFound(entry.hash.to_string()))?;

        self.store.disconnect_tip()?;
        self.registry.revert_block(&entry.hash);
        self.index.clear_flag(self.best, status::CONNECTED | status::MAIN_CHAIN);
        self.side_blocks.insert(entry.hash, block.clone());

        self.best = entry.parent.ok_or_else(|| {
            ChainError::Store("attempted to disconnect genesis".into())
        })?;
        Ok(block)
    }

    /// Switch the main chain to the branch ending at `new_tip`.
    fn reorganize(&mut self, new_tip: usize) -> Result<AcceptOutcome, ChainError> {
        // Collect the new branch back to the fork point on the main chain.
        let mut branch: Vec<usize> = Vec::new();
        let mut cursor = new_tip;
        loop {
            let entry = self.index.get(cursor);
            if entry.has(status::MAIN_CHAIN) {
                break;
            }
            branch.push(cursor);
            match entry.parent {
                Some(parent) => cursor = parent,
                None => return Err(ChainError::Store("branch does not meet the chain".into())),
            }
        }
        let fork = cursor;
        branch.reverse();

        let depth = self.index.get(self.best).height - self.index.get(fork).height;
        if depth > MAX_REORG_DEPTH {
            warn!(depth, "refusing reorganization deeper than the guard");
            return Ok(AcceptOutcome::SideChain { hash: self.index.get(new_tip).hash });
        }

        // Every body on the new branch must be at hand before touching state.
        let mut branch_blocks: Vec<(usize, Block)> = Vec::with_capacity(branch.len());
        for &handle in &branch {
            let hash = self.index.get(handle).hash;
            let Some(body) = self.side_blocks.get(&hash).cloned() else {
                warn!(%hash, "reorganization deferred: branch body missing");
                return Ok(AcceptOutcome::SideChain { hash: self.index.get(new_tip).hash });
            };
            branch_blocks.push((handle, body));
        }

        info!(
            from = self.index.get(self.best).height,
            to = self.index.get(new_tip).height,
            fork = self.index.get(fork).height,
            "reorganizing"
        );

        // Unwind the old branch, newest first.
        let mut disconnected_blocks: Vec<Block> = Vec::new();
        while self.best != fork {
            disconnected_blocks.push(self.disconnect_one()?);
        }
        let disconnected: Vec<Hash256> =
            disconnected_blocks.iter().map(|b| b.header.hash()).collect();

        // Connect the new branch; roll everything back if any block fails.
        let now = (self.clock)();
        let mut connected: Vec<Hash256> = Vec::new();
        for (i, (handle, body)) in branch_blocks.iter().enumerate() {
            let entry = self.index.get(*handle).clone();
            let parent_time = self.index.get(entry.parent.expect("non-genesis")).header.time;

            if let Err(e) = self.connect_one(body, entry.height, *handle, parent_time, now) {
                warn!(hash = %entry.hash, error = %e, "reorganization failed; restoring old chain");
                self.index.set_flag(*handle, status::INVALID);

                // Unwind the partial new branch.
                for _ in 0..i {
                    self.disconnect_one()?;
                }
                // Reconnect the old branch, oldest first.
                for old in disconnected_blocks.iter().rev() {
                    let old_hash = old.header.hash();
                    let old_handle = self
                        .index
                        .handle_of(&old_hash)
                        .expect("old branch remains indexed");
                    let old_height = self.index.get(old_handle).height;
                    let old_parent_time = {
                        let parent = self.index.get(old_handle).parent.expect("non-genesis");
                        self.index.get(parent).header.time
                    };
                    self.connect_one(old, old_height, old_handle, old_parent_time, now)?;
                }
                return Err(e);
            }
            connected.push(entry.hash);
        }

        // Transactions unique to the old branch go back to the mempool.
        let new_txids: std::collections::HashSet<Hash256> = branch_blocks
            .iter()
            .flat_map(|(_, b)| b.transactions.iter().map(|tx| tx.txid()))
            .collect();
        let returned_txs: Vec<Transaction> = disconnected_blocks
            .iter()
            .flat_map(|b| b.transactions.iter().skip(1).cloned())
            .filter(|tx| !new_txids.contains(&tx.txid()))
            .collect();

        let tip = self.index.get(new_tip);
        Ok(AcceptOutcome::Reorganized {
            hash: tip.hash,
            height: tip.height,
            disconnected,
            connected,
            returned_txs,
        })
    }

    // --- orphan blocks ---

    fn hold_orphan(&mut self, block: Block) {
        if self.orphan_count >= MAX_ORPHAN_BLOCKS {
            // Drop an arbitrary waiting set to stay bounded.
            if let Some(key) = self.orphans.keys().next().copied() {
                if let Some(dropped) = self.orphans.remove(&key) {
                    self.orphan_count -= dropped.len();
                }
            }
        }
        debug!(hash = %block.header.hash(), parent = %block.header.prev_hash, "holding orphan block");
        self.orphans.entry(block.header.prev_hash).or_default().push(block);
        self.orphan_count += 1;
    }

    /// Re-run acceptance for orphans whose parent just arrived.
    fn attach_orphans(&mut self, parent_hash: Hash256) {
        let mut queue = vec![parent_hash];
        while let Some(parent) = queue.pop() {
            let Some(children) = self.orphans.remove(&parent) else { continue };
            self.orphan_count -= children.len();
            for child in children {
                let child_hash = child.header.hash();
                match self.accept_block(&child) {
                    Ok(_) => queue.push(child_hash),
                    Err(e) => debug!(hash = %child_hash, error = %e, "orphan rejected"),
                }
            }
        }
    }

    pub fn orphan_count(&self) -> usize {
        self.orphan_count
    }

    // --- template assembly ---

    /// Assemble an unsealed block template on top of the best tip.
    ///
    /// The coinbase pays subsidy plus the template's fees to
    /// `coinbase_script_pubkey` and leaves `script_sig` empty for the sealer.
    pub fn create_block_template(
        &self,
        coinbase_script_pubkey: Vec<u8>,
        mempool_template: &BlockTemplate,
        now: u64,
    ) -> (Block, u64) {
        let tip = self.index.get(self.best);
        let height = tip.height + 1;
        let reward = self.params.subsidy(height) + mempool_template.total_fees;

        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint::null(),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { value: reward, script_pubkey: coinbase_script_pubkey }],
            // Height marker keeps coinbase txids unique across heights.
            locktime: height as u32,
        };

        let mut transactions = Vec::with_capacity(1 + mempool_template.transactions.len());
        transactions.push(coinbase);
        transactions.extend(mempool_template.transactions.iter().cloned());

        let time = now.max(u64::from(self.index.median_time_past(self.best)) + 1) as u32;
        let bits = if self.params.participation_active(height) { 0 } else { tip.header.bits };

        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: tip.hash,
                // Sealing rebuilds the merkle root after the stake proof is
                // installed.
                merkle_root: Hash256::ZERO,
                time,
                bits,
                nonce: 0,
            },
            transactions,
        };
        (block, height)
    }
}
