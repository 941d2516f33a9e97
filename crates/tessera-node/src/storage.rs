//! RocksDB-backed persistent chain state storage.
//!
//! Implements [`ChainStore`] over column families for headers, blocks,
//! UTXOs, the height index, per-block undo journals, the transaction index,
//! participant snapshots, known peer addresses, and aggregate metadata.
//! Every block connect/disconnect is a single atomic [`WriteBatch`].
//!
//! All record encodings use the canonical codec.

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};

use tessera_core::chain_state::{ChainStore, ConnectBlockResult, DisconnectBlockResult};
use tessera_core::codec::{Decodable, Encodable, Reader, write_var_int};
use tessera_core::error::{ChainStateError, CodecError, TesseraError};
use tessera_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};
use tessera_lottery::registry::ParticipantRecord;
use tessera_network::NetAddress;

const CF_HEADERS: &str = "headers";
const CF_BLOCKS: &str = "blocks";
const CF_UTXOS: &str = "utxos";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_UNDO: &str = "undo";
const CF_TX_INDEX: &str = "tx_index";
const CF_PARTICIPANTS: &str = "participants";
const CF_PEER_ADDRS: &str = "peer_addrs";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_HEADERS,
    CF_BLOCKS,
    CF_UTXOS,
    CF_HEIGHT_INDEX,
    CF_UNDO,
    CF_TX_INDEX,
    CF_PARTICIPANTS,
    CF_PEER_ADDRS,
    CF_METADATA,
];

const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TIP_HASH: &[u8] = b"best_hash";
const META_UTXO_COUNT: &[u8] = b"utxo_count";
const META_UTXO_VALUE: &[u8] = b"utxo_value";

/// Per-block undo journal as stored on disk.
struct StoredUndo {
    spent: Vec<(OutPoint, UtxoEntry)>,
}

impl Encodable for StoredUndo {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_var_int(self.spent.len() as u64, out);
        for (outpoint, entry) in &self.spent {
            outpoint.encode_into(out);
            entry.encode_into(out);
        }
    }
}

impl Decodable for StoredUndo {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.read_size()?;
        if count > r.remaining() {
            return Err(CodecError::UnexpectedEnd);
        }
        let mut spent = Vec::with_capacity(count);
        for _ in 0..count {
            spent.push((OutPoint::decode_from(r)?, UtxoEntry::decode_from(r)?));
        }
        Ok(Self { spent })
    }
}

fn storage_err(e: impl std::fmt::Display) -> TesseraError {
    TesseraError::Storage(e.to_string())
}

/// RocksDB-backed [`ChainStore`].
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create the database at `path` with all column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TesseraError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, TesseraError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TesseraError::Storage(format!("missing column family: {name}")))
    }

    fn get_cf(&self, name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, TesseraError> {
        self.db.get_cf(self.cf(name)?, key).map_err(storage_err)
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, TesseraError> {
        match self.get_cf(CF_METADATA, key)? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            Some(_) => Err(TesseraError::Storage("invalid metadata length".into())),
            None => Ok(0),
        }
    }

    fn height_key(height: u64) -> [u8; 8] {
        // Big-endian so heights iterate in order.
        height.to_be_bytes()
    }

    // --- participant snapshot ---

    /// Replace the persisted participant snapshot.
    pub fn save_participants(&self, records: &[ParticipantRecord]) -> Result<(), TesseraError> {
        let cf = self.cf(CF_PARTICIPANTS)?;
        let mut batch = WriteBatch::default();

        let existing: Vec<Vec<u8>> = self
            .db
            .iterator_cf(cf, rocksdb::IteratorMode::Start)
            .map(|item| item.map(|(k, _)| k.to_vec()))
            .collect::<Result<_, _>>()
            .map_err(storage_err)?;
        for key in existing {
            batch.delete_cf(cf, key);
        }

        for record in records {
            batch.put_cf(cf, record.public_key, record.encode());
        }
        self.db.write(batch).map_err(storage_err)
    }

    /// Load the persisted participant snapshot.
    pub fn load_participants(&self) -> Result<Vec<ParticipantRecord>, TesseraError> {
        let cf = self.cf(CF_PARTICIPANTS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            records.push(ParticipantRecord::decode(&value).map_err(TesseraError::Codec)?);
        }
        Ok(records)
    }

    // --- peer address pool ---

    /// Replace the persisted peer address pool.
    pub fn save_peer_addresses(&self, addresses: &[NetAddress]) -> Result<(), TesseraError> {
        let cf = self.cf(CF_PEER_ADDRS)?;
        let mut batch = WriteBatch::default();

        let existing: Vec<Vec<u8>> = self
            .db
            .iterator_cf(cf, rocksdb::IteratorMode::Start)
            .map(|item| item.map(|(k, _)| k.to_vec()))
            .collect::<Result<_, _>>()
            .map_err(storage_err)?;
        for key in existing {
            batch.delete_cf(cf, key);
        }

        for address in addresses {
            let mut key = address.ip.to_vec();
            key.extend_from_slice(&address.port.to_le_bytes());
            batch.put_cf(cf, key, address.encode());
        }
        self.db.write(batch).map_err(storage_err)
    }

    /// Load the persisted peer address pool.
    pub fn load_peer_addresses(&self) -> Result<Vec<NetAddress>, TesseraError> {
        let cf = self.cf(CF_PEER_ADDRS)?;
        let mut addresses = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            addresses.push(NetAddress::decode(&value).map_err(TesseraError::Codec)?);
        }
        Ok(addresses)
    }
}

impl ChainStore for RocksStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, TesseraError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch { expected: 0, got: height }.into());
            }
        } else if height != tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: tip_height + 1,
                got: height,
            }
            .into());
        }

        let block_hash = block.header.hash();
        if self.get_block_hash(height)? == Some(block_hash) {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        let mut batch = WriteBatch::default();
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_tx_index = self.cf(CF_TX_INDEX)?;

        // Outputs created earlier in this block are spendable later in it,
        // so track the in-flight layer alongside the batch.
        let mut pending: HashMap<OutPoint, UtxoEntry> = HashMap::new();
        let mut undo = StoredUndo { spent: Vec::new() };
        let mut created = 0usize;
        let mut spent_value: i64 = 0;
        let mut created_value: i64 = 0;

        for tx in &block.transactions {
            let txid = tx.txid();

            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let entry = if let Some(entry) = pending.remove(&input.prevout) {
                        entry
                    } else {
                        let bytes = self
                            .db
                            .get_cf(cf_utxos, input.prevout.encode())
                            .map_err(storage_err)?
                            .ok_or_else(|| {
                                ChainStateError::MissingUtxo(input.prevout.to_string())
                            })?;
                        UtxoEntry::decode(&bytes).map_err(TesseraError::Codec)?
                    };
                    batch.delete_cf(cf_utxos, input.prevout.encode());
                    spent_value += entry.output.value;
                    undo.spent.push((input.prevout, entry));
                }
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                let entry = UtxoEntry {
                    output: output.clone(),
                    height,
                    is_coinbase: tx.is_coinbase(),
                };
                batch.put_cf(cf_utxos, outpoint.encode(), entry.encode());
                created_value += output.value;
                pending.insert(outpoint, entry);
                created += 1;
            }

            batch.put_cf(cf_tx_index, txid.0, block_hash.0);
        }

        batch.put_cf(self.cf(CF_HEADERS)?, block_hash.0, block.header.encode());
        batch.put_cf(self.cf(CF_BLOCKS)?, block_hash.0, block.encode());
        batch.put_cf(self.cf(CF_HEIGHT_INDEX)?, Self::height_key(height), block_hash.0);
        batch.put_cf(self.cf(CF_UNDO)?, block_hash.0, undo.encode());

        let spent = undo.spent.len();
        let cf_meta = self.cf(CF_METADATA)?;
        batch.put_cf(cf_meta, META_TIP_HEIGHT, height.to_le_bytes());
        batch.put_cf(cf_meta, META_TIP_HASH, block_hash.0);
        let utxo_count = self.get_meta_u64(META_UTXO_COUNT)? + created as u64 - spent as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, utxo_count.to_le_bytes());
        let utxo_value =
            self.get_meta_u64(META_UTXO_VALUE)? as i64 + created_value - spent_value;
        batch.put_cf(cf_meta, META_UTXO_VALUE, (utxo_value as u64).to_le_bytes());

        self.db.write(batch).map_err(storage_err)?;
        Ok(ConnectBlockResult { utxos_created: created, utxos_spent: spent })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, TesseraError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let block = self
            .get_block(&tip_hash)?
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;
        let undo_bytes = self
            .get_cf(CF_UNDO, &tip_hash.0)?
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;
        let undo = StoredUndo::decode(&undo_bytes).map_err(TesseraError::Codec)?;

        let mut batch = WriteBatch::default();
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_tx_index = self.cf(CF_TX_INDEX)?;

        let mut removed = 0usize;
        let mut removed_value: i64 = 0;
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                batch.delete_cf(cf_utxos, OutPoint::new(txid, index as u32).encode());
                removed_value += output.value;
                removed += 1;
            }
            batch.delete_cf(cf_tx_index, txid.0);
        }

        let mut restored_value: i64 = 0;
        for (outpoint, entry) in &undo.spent {
            batch.put_cf(cf_utxos, outpoint.encode(), entry.encode());
            restored_value += entry.output.value;
        }

        batch.delete_cf(self.cf(CF_UNDO)?, tip_hash.0);
        batch.delete_cf(self.cf(CF_HEIGHT_INDEX)?, Self::height_key(tip_height));

        let cf_meta = self.cf(CF_METADATA)?;
        if tip_height == 0 {
            batch.delete_cf(cf_meta, META_TIP_HEIGHT);
            batch.delete_cf(cf_meta, META_TIP_HASH);
        } else {
            batch.put_cf(cf_meta, META_TIP_HEIGHT, (tip_height - 1).to_le_bytes());
            batch.put_cf(cf_meta, META_TIP_HASH, block.header.prev_hash.0);
        }
        let utxo_count =
            self.get_meta_u64(META_UTXO_COUNT)? + undo.spent.len() as u64 - removed as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, utxo_count.to_le_bytes());
        let utxo_value =
            self.get_meta_u64(META_UTXO_VALUE)? as i64 + restored_value - removed_value;
        batch.put_cf(cf_meta, META_UTXO_VALUE, (utxo_value as u64).to_le_bytes());

        self.db.write(batch).map_err(storage_err)?;
        Ok(DisconnectBlockResult { utxos_restored: undo.spent.len(), utxos_removed: removed })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, TesseraError> {
        match self.get_cf(CF_UTXOS, &outpoint.encode())? {
            Some(bytes) => Ok(Some(UtxoEntry::decode(&bytes).map_err(TesseraError::Codec)?)),
            None => Ok(None),
        }
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), TesseraError> {
        match self.get_cf(CF_METADATA, META_TIP_HASH)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok((self.get_meta_u64(META_TIP_HEIGHT)?, Hash256(hash)))
            }
            Some(_) => Err(TesseraError::Storage("invalid tip hash length".into())),
            None => Ok((0, Hash256::ZERO)),
        }
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, TesseraError> {
        match self.get_cf(CF_HEADERS, &hash.0)? {
            Some(bytes) => Ok(Some(BlockHeader::decode(&bytes).map_err(TesseraError::Codec)?)),
            None => Ok(None),
        }
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, TesseraError> {
        match self.get_cf(CF_BLOCKS, &hash.0)? {
            Some(bytes) => Ok(Some(Block::decode(&bytes).map_err(TesseraError::Codec)?)),
            None => Ok(None),
        }
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, TesseraError> {
        match self.get_cf(CF_HEIGHT_INDEX, &Self::height_key(height))? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256(hash)))
            }
            Some(_) => Err(TesseraError::Storage("invalid height index entry".into())),
            None => Ok(None),
        }
    }

    fn get_transaction(&self, txid: &Hash256) -> Result<Option<(Transaction, Hash256)>, TesseraError> {
        let Some(bytes) = self.get_cf(CF_TX_INDEX, &txid.0)? else {
            return Ok(None);
        };
        if bytes.len() != 32 {
            return Err(TesseraError::Storage("invalid tx index entry".into()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        let block_hash = Hash256(hash);

        let Some(block) = self.get_block(&block_hash)? else {
            return Ok(None);
        };
        Ok(block
            .transactions
            .iter()
            .find(|tx| tx.txid() == *txid)
            .map(|tx| (tx.clone(), block_hash)))
    }

    fn utxo_count(&self) -> usize {
        self.get_meta_u64(META_UTXO_COUNT).unwrap_or(0) as usize
    }

    fn is_empty(&self) -> bool {
        matches!(self.chain_tip(), Ok((_, hash)) if hash == Hash256::ZERO)
    }

    fn total_utxo_value(&self) -> Result<i64, TesseraError> {
        Ok(self.get_meta_u64(META_UTXO_VALUE)? as i64)
    }

    fn flush(&self) -> Result<(), TesseraError> {
        self.db.flush().map_err(storage_err)
    }
}
