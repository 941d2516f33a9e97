//! Block validation.
//!
//! Two levels:
//!
//! - **Structural** ([`validate_block_structure`]): context-free checks on
//!   block format, coinbase position, duplicate outpoints, merkle root, and
//!   size. Proof checks (work or lottery) are dispatched by the chain
//!   manager, not here.
//! - **Contextual** ([`validate_block_body`]): transaction validation over a
//!   scratch UTXO overlay layered on the parent tip, fee accumulation, and
//!   the coinbase value cap.
//!
//! Header timing rules ([`validate_header_time`]) are split out because they
//! only need the parent's context, not the UTXO set.

use std::collections::HashSet;

use crate::codec::Encodable;
use crate::constants::{MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME};
use crate::error::{BlockError, TransactionError};
use crate::merkle;
use crate::types::{Amount, Block, BlockHeader, Hash256, OutPoint, UtxoEntry};
use crate::utxo::{UtxoOverlay, UtxoView};
use crate::validation;

/// Summary of a successfully validated block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-coinbase transaction fees.
    pub total_fees: Amount,
    /// Total value of all coinbase outputs.
    pub coinbase_value: Amount,
}

/// Validate block structure (context-free).
///
/// - At least one transaction, the first and only the first a coinbase
/// - All transactions structurally valid
/// - No duplicate transaction IDs
/// - No input outpoint spent twice anywhere in the block
/// - Header merkle root matches the transactions
/// - Serialized size within [`MAX_BLOCK_SIZE`]
pub fn validate_block_structure(block: &Block) -> Result<(), BlockError> {
    if block.transactions.is_empty() {
        return Err(BlockError::NoCoinbase);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    let mut txid_vec = Vec::with_capacity(block.transactions.len());
    let mut spent_outpoints: HashSet<OutPoint> = HashSet::new();

    for (index, tx) in block.transactions.iter().enumerate() {
        if index > 0 && tx.is_coinbase() {
            return Err(BlockError::MultipleCoinbase);
        }

        validation::validate_transaction_structure(tx)
            .map_err(|source| BlockError::Transaction { index, source })?;

        let txid = tx.txid();
        if !txids.insert(txid) {
            return Err(BlockError::DuplicateTxid(txid.to_string()));
        }
        txid_vec.push(txid);

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                if !spent_outpoints.insert(input.prevout) {
                    return Err(BlockError::DoubleSpend(input.prevout.to_string()));
                }
            }
        }
    }

    let computed_root = merkle::merkle_root(&txid_vec);
    if block.header.merkle_root != computed_root {
        return Err(BlockError::InvalidMerkleRoot);
    }

    let size = block.encode().len();
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::OversizedBlock { size, max: MAX_BLOCK_SIZE });
    }

    Ok(())
}

/// Validate header timing against the parent's context.
///
/// The timestamp must exceed the parent's median-time-past and may not be
/// more than two hours ahead of local wall-clock time.
pub fn validate_header_time(
    header: &BlockHeader,
    parent_median_time_past: u32,
    now: u64,
) -> Result<(), BlockError> {
    if u64::from(header.time) > now + MAX_FUTURE_BLOCK_TIME {
        return Err(BlockError::TimestampTooFar(header.time as i64 - now as i64));
    }
    if header.time <= parent_median_time_past {
        return Err(BlockError::TimestampNotAfterMedian);
    }
    Ok(())
}

/// Validate a block body against the parent tip's UTXO set (contextual).
///
/// Spends each non-coinbase transaction's inputs from a scratch overlay over
/// `parent_view`, so outputs created earlier in the block are spendable by
/// later transactions. Accumulates fees and enforces
/// `coinbase outputs <= subsidy + fees`.
///
/// Structural validation is assumed to have already passed.
pub fn validate_block_body(
    block: &Block,
    parent_view: &dyn UtxoView,
    height: u64,
    block_subsidy: Amount,
) -> Result<ValidatedBlock, BlockError> {
    let mut overlay = UtxoOverlay::new(parent_view);
    let mut total_fees: Amount = 0;

    for (index, tx) in block.transactions.iter().enumerate() {
        if index == 0 {
            // Coinbase outputs enter the overlay like any other, so a block
            // cannot double-pay an outpoint it just created.
            add_outputs(&mut overlay, tx, height, true);
            continue;
        }

        let validated = validation::validate_transaction(tx, |op| overlay.get_utxo(op), height)
            .map_err(|source| BlockError::Transaction { index, source })?;

        for input in &tx.inputs {
            // Validation looked these up already, so the spend cannot miss.
            overlay.spend(&input.prevout);
        }
        add_outputs(&mut overlay, tx, height, false);

        total_fees = total_fees
            .checked_add(validated.fee)
            .ok_or(BlockError::Transaction { index, source: TransactionError::ValueOverflow })?;
    }

    let coinbase = &block.transactions[0];
    let coinbase_value = coinbase.total_output_value().ok_or(BlockError::Transaction {
        index: 0,
        source: TransactionError::ValueOverflow,
    })?;

    let max_reward = block_subsidy.checked_add(total_fees).ok_or(BlockError::Transaction {
        index: 0,
        source: TransactionError::ValueOverflow,
    })?;

    if coinbase_value > max_reward {
        return Err(BlockError::InvalidReward { got: coinbase_value, max: max_reward });
    }

    Ok(ValidatedBlock { total_fees, coinbase_value })
}

fn add_outputs(overlay: &mut UtxoOverlay<'_>, tx: &crate::types::Transaction, height: u64, is_coinbase: bool) {
    let txid = tx.txid();
    for (index, output) in tx.outputs.iter().enumerate() {
        overlay.add(
            OutPoint::new(txid, index as u32),
            UtxoEntry { output: output.clone(), height, is_coinbase },
        );
    }
}
