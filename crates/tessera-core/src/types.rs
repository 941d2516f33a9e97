//! Core protocol types: transactions, blocks, outpoints, UTXO entries.
//!
//! All monetary values are in tesserae (1 TSR = 10^8 tesserae), carried as
//! signed 64-bit integers. Hashes are double SHA-256 over the canonical
//! codec encoding.

use std::fmt;

use crate::codec::{Decodable, Encodable, Reader, write_var_bytes};
use crate::constants::{COINBASE_MATURITY, MAX_MONEY};
use crate::error::CodecError;
use crate::hashes::sha256d;

/// Monetary amount in tesserae.
pub type Amount = i64;

/// Whether `value` lies in the valid money range `[0, MAX_MONEY]`.
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// A 32-byte hash value.
///
/// Used for transaction IDs, block header hashes, and merkle roots
/// (all double SHA-256).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Encodable for Hash256 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Decodable for Hash256 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self(r.read_array::<32>()?))
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    const NULL_INDEX: u32 = u32::MAX;

    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self { txid: Hash256::ZERO, index: Self::NULL_INDEX }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == Self::NULL_INDEX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl Encodable for OutPoint {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.txid.encode_into(out);
        self.index.encode_into(out);
    }
}

impl Decodable for OutPoint {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            txid: Hash256::decode_from(r)?,
            index: r.read_u32()?,
        })
    }
}

/// A transaction input, spending a previous output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub prevout: OutPoint,
    /// Unlocking script. For coinbase, arbitrary data plus the stake proof.
    pub script_sig: Vec<u8>,
    /// Sequence number. Reserved; producers set `u32::MAX`.
    pub sequence: u32,
}

impl Encodable for TxInput {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.prevout.encode_into(out);
        write_var_bytes(&self.script_sig, out);
        self.sequence.encode_into(out);
    }
}

impl Decodable for TxInput {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            prevout: OutPoint::decode_from(r)?,
            script_sig: r.read_var_bytes()?,
            sequence: r.read_u32()?,
        })
    }
}

/// A transaction output, creating a new UTXO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in tesserae.
    pub value: Amount,
    /// Locking script that must be satisfied to spend this output.
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOutput {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.value.encode_into(out);
        write_var_bytes(&self.script_pubkey, out);
    }
}

impl Decodable for TxOutput {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            value: r.read_i64()?,
            script_pubkey: r.read_var_bytes()?,
        })
    }
}

/// A transaction transferring value between script-locked outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Protocol version. Version 2 marks a stake-locking transaction.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub locktime: u32,
}

impl Transaction {
    /// Compute the transaction ID: double SHA-256 of the canonical encoding.
    pub fn txid(&self) -> Hash256 {
        Hash256(sha256d(&self.encode()))
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of all output values. Returns `None` on overflow.
    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0i64, |acc, out| acc.checked_add(out.value))
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.encode().len()
    }
}

impl Encodable for Transaction {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.version.encode_into(out);
        self.inputs.encode_into(out);
        self.outputs.encode_into(out);
        self.locktime.encode_into(out);
    }
}

impl Decodable for Transaction {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.read_u32()?,
            inputs: Vec::decode_from(r)?,
            outputs: Vec::decode_from(r)?,
            locktime: r.read_u32()?,
        })
    }
}

/// Block header.
///
/// Hash is the double SHA-256 of the 80-byte canonical serialization.
/// Post-activation, `nonce` is always zero and `bits` is retained for
/// format compatibility only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub time: u32,
    /// Compact difficulty target (legacy proof-of-work path only).
    pub bits: u32,
    /// Proof-of-work nonce (legacy path only; zero post-activation).
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header length.
    pub const ENCODED_LEN: usize = 80;

    /// Compute the block header hash (double SHA-256 of the 80-byte form).
    pub fn hash(&self) -> Hash256 {
        Hash256(sha256d(&self.encode()))
    }
}

impl Encodable for BlockHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.version.encode_into(out);
        self.prev_hash.encode_into(out);
        self.merkle_root.encode_into(out);
        self.time.encode_into(out);
        self.bits.encode_into(out);
        self.nonce.encode_into(out);
    }
}

impl Decodable for BlockHeader {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.read_u32()?,
            prev_hash: Hash256::decode_from(r)?,
            merkle_root: Hash256::decode_from(r)?,
            time: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

/// A complete block: header plus transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.encode().len()
    }
}

impl Encodable for Block {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.header.encode_into(out);
        self.transactions.encode_into(out);
    }
}

impl Decodable for Block {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            header: BlockHeader::decode_from(r)?,
            transactions: Vec::decode_from(r)?,
        })
    }
}

/// An entry in the unspent transaction output set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block that created this output.
    pub height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Whether this output may be spent when the chain tip is `best_height`.
    ///
    /// Coinbase outputs mature once `best_height >= height + COINBASE_MATURITY`;
    /// other outputs are always spendable.
    pub fn is_mature(&self, best_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        best_height >= self.height + COINBASE_MATURITY
    }
}

impl Encodable for UtxoEntry {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.output.encode_into(out);
        self.height.encode_into(out);
        out.push(self.is_coinbase as u8);
    }
}

impl Decodable for UtxoEntry {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let output = TxOutput::decode_from(r)?;
        let height = r.read_u64()?;
        let is_coinbase = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(CodecError::InvalidValue("is_coinbase")),
        };
        Ok(Self { output, height, is_coinbase })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_script() -> Vec<u8> {
        vec![0x76, 0xA9, 0x14, 0xAA, 0xAA, 0xAA]
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint { txid: Hash256([0x11; 32]), index: 0 },
                script_sig: vec![0x01, 0x02],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                script_pubkey: sample_script(),
            }],
            locktime: 0,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x01],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                script_pubkey: sample_script(),
            }],
            locktime: 0,
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 1_700_000_000,
            bits: 0x207F_FFFF,
            nonce: 0,
        }
    }

    // --- money range ---

    #[test]
    fn money_range_bounds() {
        assert!(money_range(0));
        assert!(money_range(crate::constants::MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(crate::constants::MAX_MONEY + 1));
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    // --- OutPoint ---

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new(Hash256([1; 32]), 0).is_null());
        // Zero txid alone is not the null marker.
        assert!(!OutPoint::new(Hash256::ZERO, 0).is_null());
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn two_null_inputs_is_not_coinbase() {
        let mut tx = sample_coinbase();
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn total_output_value_sums() {
        let mut tx = sample_tx();
        tx.outputs.push(TxOutput { value: 7, script_pubkey: vec![] });
        assert_eq!(tx.total_output_value(), Some(50 * COIN + 7));
    }

    #[test]
    fn total_output_value_overflow_is_none() {
        let mut tx = sample_tx();
        tx.outputs = vec![
            TxOutput { value: i64::MAX, script_pubkey: vec![] },
            TxOutput { value: 1, script_pubkey: vec![] },
        ];
        assert_eq!(tx.total_output_value(), None);
    }

    #[test]
    fn txid_deterministic_and_sensitive() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());
        let mut tx2 = sample_tx();
        tx2.locktime = 1;
        assert_ne!(tx.txid(), tx2.txid());
    }

    // --- header ---

    #[test]
    fn header_encodes_to_80_bytes() {
        assert_eq!(sample_header().encode().len(), BlockHeader::ENCODED_LEN);
    }

    #[test]
    fn header_hash_changes_with_any_field() {
        let base = sample_header();
        let mut h = base;
        h.nonce = 1;
        assert_ne!(base.hash(), h.hash());
        let mut h = base;
        h.time += 1;
        assert_ne!(base.hash(), h.hash());
    }

    // --- hash stability through encode/decode ---

    #[test]
    fn tx_hash_stable_after_round_trip() {
        let tx = sample_tx();
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }

    #[test]
    fn header_hash_stable_after_round_trip() {
        let header = sample_header();
        let decoded = BlockHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn block_round_trip() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase(), sample_tx()],
        };
        assert_eq!(Block::decode(&block.encode()).unwrap(), block);
    }

    #[test]
    fn truncated_block_fails() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase()],
        };
        let mut bytes = block.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(Block::decode(&bytes).is_err());
    }

    // --- UtxoEntry ---

    #[test]
    fn coinbase_maturity_boundary() {
        let entry = UtxoEntry {
            output: TxOutput { value: 50 * COIN, script_pubkey: vec![] },
            height: 100,
            is_coinbase: true,
        };
        assert!(!entry.is_mature(100 + COINBASE_MATURITY - 1));
        assert!(entry.is_mature(100 + COINBASE_MATURITY));
    }

    #[test]
    fn non_coinbase_always_mature() {
        let entry = UtxoEntry {
            output: TxOutput { value: 1, script_pubkey: vec![] },
            height: 100,
            is_coinbase: false,
        };
        assert!(entry.is_mature(0));
    }

    #[test]
    fn utxo_entry_round_trip() {
        let entry = UtxoEntry {
            output: TxOutput { value: 12_345, script_pubkey: vec![1, 2, 3] },
            height: 42,
            is_coinbase: true,
        };
        assert_eq!(UtxoEntry::decode(&entry.encode()).unwrap(), entry);
    }

    #[test]
    fn utxo_entry_bad_bool_rejected() {
        let entry = UtxoEntry {
            output: TxOutput { value: 1, script_pubkey: vec![] },
            height: 0,
            is_coinbase: false,
        };
        let mut bytes = entry.encode();
        *bytes.last_mut().unwrap() = 2;
        assert_eq!(
            UtxoEntry::decode(&bytes).unwrap_err(),
            CodecError::InvalidValue("is_coinbase")
        );
    }
}
