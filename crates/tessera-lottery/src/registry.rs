//! Participant registry: who holds locked stake and since when.
//!
//! Stake is locked by a transaction with
//! [`STAKE_TX_VERSION`] whose first output carries the stake and whose first
//! input's final pushed item is the participant's Ed25519 public key. The
//! registry is updated only from within block connect/disconnect under the
//! chain writer lock; every connected block leaves an undo record so a
//! reorganization can rewind it exactly.

use std::collections::HashMap;

use tessera_core::codec::{Decodable, Encodable, Reader};
use tessera_core::constants::STAKE_TX_VERSION;
use tessera_core::error::CodecError;
use tessera_core::hashes::hash160;
use tessera_core::params::ChainParams;
use tessera_core::script;
use tessera_core::types::{Amount, Block, Hash256, OutPoint};
use tracing::debug;

/// A registered lottery participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantRecord {
    /// `HASH160(public_key)`.
    pub address: [u8; 20],
    /// Locked stake in tesserae.
    pub stake_amount: Amount,
    /// Height of the block that locked the stake.
    pub stake_height: u64,
    /// Ed25519 public key identifying the participant.
    pub public_key: [u8; 32],
}

impl ParticipantRecord {
    /// Eligibility at `height`: enough stake, matured long enough.
    pub fn is_eligible(&self, height: u64, params: &ChainParams) -> bool {
        self.stake_amount >= params.min_stake
            && height.saturating_sub(self.stake_height) >= params.stake_maturity
    }

    /// Veterans (stake age at least 10x the maturity window) bypass the
    /// anti-clustering entry cap.
    pub fn is_veteran(&self, height: u64, params: &ChainParams) -> bool {
        height.saturating_sub(self.stake_height) >= params.stake_maturity.saturating_mul(10)
    }
}

impl Encodable for ParticipantRecord {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address);
        self.stake_amount.encode_into(out);
        self.stake_height.encode_into(out);
        out.extend_from_slice(&self.public_key);
    }
}

impl Decodable for ParticipantRecord {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: r.read_array::<20>()?,
            stake_amount: r.read_i64()?,
            stake_height: r.read_u64()?,
            public_key: r.read_array::<32>()?,
        })
    }
}

/// One reversible registry mutation.
#[derive(Clone, Debug)]
enum RegistryOp {
    /// A record was inserted (no previous record under this key).
    Added { public_key: [u8; 32] },
    /// A record replaced `previous`.
    Replaced { previous: ParticipantRecord },
    /// A record was removed.
    Removed { record: ParticipantRecord, stake_outpoint: OutPoint },
}

/// Registry of lottery participants keyed by public key.
pub struct ParticipantRegistry {
    by_pubkey: HashMap<[u8; 32], ParticipantRecord>,
    /// Stake outpoint → public key, for spend-triggered deregistration.
    by_stake_outpoint: HashMap<OutPoint, [u8; 32]>,
    /// Undo journals, LIFO in block-connect order.
    undo_stack: Vec<(Hash256, Vec<RegistryOp>)>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self {
            by_pubkey: HashMap::new(),
            by_stake_outpoint: HashMap::new(),
            undo_stack: Vec::new(),
        }
    }

    pub fn get(&self, public_key: &[u8; 32]) -> Option<&ParticipantRecord> {
        self.by_pubkey.get(public_key)
    }

    pub fn len(&self) -> usize {
        self.by_pubkey.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pubkey.is_empty()
    }

    /// Total stake locked across all participants.
    pub fn total_staked(&self) -> Amount {
        self.by_pubkey.values().map(|r| r.stake_amount).sum()
    }

    /// Number of participants eligible at `height`.
    pub fn eligible_count(&self, height: u64, params: &ChainParams) -> u64 {
        self.by_pubkey
            .values()
            .filter(|r| r.is_eligible(height, params))
            .count() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.by_pubkey.values()
    }

    /// Seed a participant outside block processing, for genesis-time
    /// allocations.
    pub fn bootstrap(&mut self, record: ParticipantRecord, stake_outpoint: OutPoint) {
        self.by_stake_outpoint.insert(stake_outpoint, record.public_key);
        self.by_pubkey.insert(record.public_key, record);
    }

    /// Apply a connected block's stake effects, journalling for revert.
    pub fn apply_block(&mut self, block: &Block, height: u64) {
        let mut ops = Vec::new();

        for tx in &block.transactions {
            // Spends of tracked stake outpoints deregister first, so a
            // re-stake in the same block lands cleanly afterwards.
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if let Some(pubkey) = self.by_stake_outpoint.remove(&input.prevout) {
                        if let Some(record) = self.by_pubkey.remove(&pubkey) {
                            debug!(address = %hex_addr(&record.address), "participant left");
                            ops.push(RegistryOp::Removed {
                                record,
                                stake_outpoint: input.prevout,
                            });
                        }
                    }
                }
            }

            if let Some((public_key, stake_amount)) = stake_lock_of(tx) {
                let record = ParticipantRecord {
                    address: hash160(&public_key),
                    stake_amount,
                    stake_height: height,
                    public_key,
                };
                let stake_outpoint = OutPoint::new(tx.txid(), 0);
                self.by_stake_outpoint.insert(stake_outpoint, public_key);
                match self.by_pubkey.insert(public_key, record) {
                    Some(previous) => ops.push(RegistryOp::Replaced { previous }),
                    None => ops.push(RegistryOp::Added { public_key }),
                }
            }
        }

        self.undo_stack.push((block.header.hash(), ops));
    }

    /// Revert the most recently applied block. `block_hash` must match the
    /// top of the undo stack; mismatches indicate a chain-manager bug and
    /// leave the registry untouched.
    pub fn revert_block(&mut self, block_hash: &Hash256) -> bool {
        match self.undo_stack.last() {
            Some((hash, _)) if hash == block_hash => {}
            _ => return false,
        }
        let (_, ops) = self.undo_stack.pop().unwrap();

        for op in ops.into_iter().rev() {
            match op {
                RegistryOp::Added { public_key } => {
                    self.by_pubkey.remove(&public_key);
                    self.by_stake_outpoint.retain(|_, pk| *pk != public_key);
                }
                RegistryOp::Replaced { previous } => {
                    self.by_pubkey.insert(previous.public_key, previous);
                }
                RegistryOp::Removed { record, stake_outpoint } => {
                    self.by_stake_outpoint.insert(stake_outpoint, record.public_key);
                    self.by_pubkey.insert(record.public_key, record);
                }
            }
        }
        true
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// If `tx` is a stake-locking transaction, its `(public key, stake)`.
///
/// Stake locks are version-2 non-coinbase transactions; the participant key
/// is the final pushed item of the first input's script_sig (the pubkey
/// position of a standard P2PKH spend), and the stake is the first output.
pub fn stake_lock_of(tx: &tessera_core::types::Transaction) -> Option<([u8; 32], Amount)> {
    if tx.version != STAKE_TX_VERSION || tx.is_coinbase() {
        return None;
    }
    let first_output = tx.outputs.first()?;
    let pushes = script::parse_pushes(&tx.inputs.first()?.script_sig)?;
    let key_bytes: [u8; 32] = pushes.last()?.as_slice().try_into().ok()?;
    Some((key_bytes, first_output.value))
}

fn hex_addr(address: &[u8; 20]) -> String {
    address.iter().map(|b| format!("{b:02x}")).collect()
}
