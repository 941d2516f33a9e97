//! Chain state storage interface and in-memory implementation.
//!
//! [`ChainStore`] is the persistence boundary for the UTXO set, block
//! storage, and tip tracking. Blocks passed to
//! [`connect_block`](ChainStore::connect_block) must already be validated;
//! the store performs only height-consistency and duplicate checks. Every
//! mutation is journalled per block so [`disconnect_tip`](ChainStore::disconnect_tip)
//! can roll the UTXO set back deterministically during reorganization.
//!
//! [`MemoryChainStore`] backs tests; the production node uses RocksDB.

use std::collections::HashMap;

use crate::error::{ChainStateError, TesseraError};
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};

/// Result of connecting a block to the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectBlockResult {
    /// Number of new UTXOs created by this block's transactions.
    pub utxos_created: usize,
    /// Number of UTXOs spent by this block's non-coinbase inputs.
    pub utxos_spent: usize,
}

/// Result of disconnecting the tip block from the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectBlockResult {
    /// Number of UTXOs restored (previously spent, now unspent again).
    pub utxos_restored: usize,
    /// Number of UTXOs removed (created by the disconnected block).
    pub utxos_removed: usize,
}

/// Undo journal for reverting a connected block.
#[derive(Clone, Debug, Default)]
pub struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    pub spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Mutable chain state storage interface.
///
/// Not thread-safe; the chain manager serializes access behind its writer
/// lock.
pub trait ChainStore: Send + Sync {
    /// Connect a validated block at the given height, updating the UTXO set
    /// and advancing the tip. Undo data is stored for later disconnection.
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, TesseraError>;

    /// Disconnect the current tip block, reverting its UTXO changes.
    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, TesseraError>;

    /// Look up a UTXO by outpoint. Returns `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, TesseraError>;

    fn contains_utxo(&self, outpoint: &OutPoint) -> Result<bool, TesseraError> {
        Ok(self.get_utxo(outpoint)?.is_some())
    }

    /// Current chain tip as `(height, block_hash)`.
    ///
    /// Returns `(0, Hash256::ZERO)` if no blocks have been connected.
    fn chain_tip(&self) -> Result<(u64, Hash256), TesseraError>;

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, TesseraError>;

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, TesseraError>;

    /// Hash of the main-chain block at `height`, if within the chain.
    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, TesseraError>;

    /// Look up the transaction with `txid` in a connected block, with its
    /// containing block hash. Backed by the optional tx index; the in-memory
    /// store always answers.
    fn get_transaction(&self, txid: &Hash256) -> Result<Option<(Transaction, Hash256)>, TesseraError>;

    /// Number of unspent transaction outputs in the set.
    fn utxo_count(&self) -> usize;

    /// Whether no blocks have been connected.
    fn is_empty(&self) -> bool;

    /// Sum of all UTXO values, for supply accounting.
    fn total_utxo_value(&self) -> Result<i64, TesseraError>;

    /// Flush buffered writes to durable storage. No-op for memory stores.
    fn flush(&self) -> Result<(), TesseraError> {
        Ok(())
    }
}

/// In-memory chain state storage for testing.
pub struct MemoryChainStore {
    utxos: HashMap<OutPoint, UtxoEntry>,
    blocks: HashMap<Hash256, Block>,
    headers: HashMap<Hash256, BlockHeader>,
    height_to_hash: HashMap<u64, Hash256>,
    tx_index: HashMap<Hash256, Hash256>,
    undo_data: HashMap<Hash256, BlockUndo>,
    tip_height: u64,
    tip_hash: Hash256,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
            blocks: HashMap::new(),
            headers: HashMap::new(),
            height_to_hash: HashMap::new(),
            tx_index: HashMap::new(),
            undo_data: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Spend a transaction's inputs, recording undo data.
    ///
    /// Coinbase transactions are skipped. A missing UTXO is an error: blocks
    /// reaching the store have been validated, so an absent input means the
    /// store and validator views diverged.
    fn spend_inputs(&mut self, tx: &Transaction, undo: &mut BlockUndo) -> Result<usize, TesseraError> {
        if tx.is_coinbase() {
            return Ok(0);
        }
        let mut spent = 0;
        for input in &tx.inputs {
            let entry = self.utxos.remove(&input.prevout).ok_or_else(|| {
                TesseraError::ChainState(ChainStateError::MissingUtxo(input.prevout.to_string()))
            })?;
            undo.spent_utxos.push((input.prevout, entry));
            spent += 1;
        }
        Ok(spent)
    }

    /// Create a transaction's outputs as new UTXOs.
    fn create_outputs(&mut self, tx: &Transaction, height: u64) -> usize {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, index as u32);
            self.utxos.insert(
                outpoint,
                UtxoEntry { output: output.clone(), height, is_coinbase },
            );
        }
        tx.outputs.len()
    }
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore for MemoryChainStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, TesseraError> {
        if self.tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch { expected: 0, got: height }.into());
            }
        } else if height != self.tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: self.tip_height + 1,
                got: height,
            }
            .into());
        }

        let block_hash = block.header.hash();
        if self.blocks.contains_key(&block_hash) && self.height_to_hash.get(&height) == Some(&block_hash)
        {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        let mut undo = BlockUndo::default();
        let mut total_spent = 0;
        let mut total_created = 0;

        for tx in &block.transactions {
            total_spent += self.spend_inputs(tx, &mut undo)?;
            total_created += self.create_outputs(tx, height);
            self.tx_index.insert(tx.txid(), block_hash);
        }

        self.headers.insert(block_hash, block.header);
        self.blocks.insert(block_hash, block.clone());
        self.height_to_hash.insert(height, block_hash);
        self.undo_data.insert(block_hash, undo);
        self.tip_height = height;
        self.tip_hash = block_hash;

        Ok(ConnectBlockResult { utxos_created: total_created, utxos_spent: total_spent })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, TesseraError> {
        if self.tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let tip_hash = self.tip_hash;
        let tip_height = self.tip_height;

        let block = self
            .blocks
            .get(&tip_hash)
            .cloned()
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        let undo = self
            .undo_data
            .remove(&tip_hash)
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;

        // Remove UTXOs created by this block, newest transaction first.
        let mut total_removed = 0;
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for index in 0..tx.outputs.len() {
                if self.utxos.remove(&OutPoint::new(txid, index as u32)).is_some() {
                    total_removed += 1;
                }
            }
            self.tx_index.remove(&txid);
        }

        let total_restored = undo.spent_utxos.len();
        for (outpoint, entry) in undo.spent_utxos {
            self.utxos.insert(outpoint, entry);
        }

        self.height_to_hash.remove(&tip_height);

        if tip_height == 0 {
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = tip_height - 1;
            self.tip_hash = block.header.prev_hash;
        }

        Ok(DisconnectBlockResult { utxos_restored: total_restored, utxos_removed: total_removed })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, TesseraError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), TesseraError> {
        Ok((self.tip_height, self.tip_hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, TesseraError> {
        Ok(self.headers.get(hash).copied())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, TesseraError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, TesseraError> {
        Ok(self.height_to_hash.get(&height).copied())
    }

    fn get_transaction(&self, txid: &Hash256) -> Result<Option<(Transaction, Hash256)>, TesseraError> {
        let Some(block_hash) = self.tx_index.get(txid) else {
            return Ok(None);
        };
        let Some(block) = self.blocks.get(block_hash) else {
            return Ok(None);
        };
        Ok(block
            .transactions
            .iter()
            .find(|tx| tx.txid() == *txid)
            .map(|tx| (tx.clone(), *block_hash)))
    }

    fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    fn is_empty(&self) -> bool {
        self.tip_hash == Hash256::ZERO
    }

    fn total_utxo_value(&self) -> Result<i64, TesseraError> {
        Ok(self.utxos.values().map(|e| e.output.value).sum())
    }
}
