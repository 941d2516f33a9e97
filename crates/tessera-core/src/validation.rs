//! Transaction validation.
//!
//! Two levels:
//!
//! - **Structural** ([`validate_transaction_structure`]): context-free checks
//!   on format and internal consistency.
//! - **Contextual** ([`validate_transaction`]): UTXO-aware checks including
//!   script verification, coinbase maturity, and value conservation.
//!
//! Coinbase transactions are only structurally validated here; their claimed
//! value is checked during block validation against subsidy plus fees.

use std::collections::HashSet;

use crate::codec::Encodable;
use crate::constants::{MAX_COINBASE_SCRIPT_SIG, MAX_TX_SIZE};
use crate::error::TransactionError;
use crate::script::{self, TransactionSignatureChecker};
use crate::types::{Amount, OutPoint, Transaction, UtxoEntry, money_range};

/// Summary of a successfully validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total value of all spent inputs.
    pub total_input: Amount,
    /// Total value of all created outputs.
    pub total_output: Amount,
    /// Transaction fee (`total_input - total_output`, non-negative).
    pub fee: Amount,
}

/// Validate transaction structure (context-free).
///
/// Common checks: non-empty inputs and outputs, every output value and the
/// output total in the money range, serialized size within [`MAX_TX_SIZE`].
/// Coinbase: exactly one null-prevout input with a bounded script_sig.
/// Regular: no null prevouts, no duplicate input outpoints.
pub fn validate_transaction_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    for (index, output) in tx.outputs.iter().enumerate() {
        if !money_range(output.value) {
            return Err(TransactionError::ValueOutOfRange { index });
        }
    }

    let total = tx.total_output_value().ok_or(TransactionError::ValueOverflow)?;
    if !money_range(total) {
        return Err(TransactionError::ValueOverflow);
    }

    let size = tx.encode().len();
    if size > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction { size, max: MAX_TX_SIZE });
    }

    if tx.is_coinbase() {
        validate_coinbase_structure(tx)
    } else {
        validate_regular_structure(tx)
    }
}

fn validate_coinbase_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase("must have exactly one input".into()));
    }
    if !tx.inputs[0].prevout.is_null() {
        return Err(TransactionError::InvalidCoinbase("input must be null outpoint".into()));
    }
    let sig_len = tx.inputs[0].script_sig.len();
    if sig_len > MAX_COINBASE_SCRIPT_SIG {
        return Err(TransactionError::InvalidCoinbase(format!(
            "script_sig too large: {sig_len} > {MAX_COINBASE_SCRIPT_SIG}"
        )));
    }
    Ok(())
}

fn validate_regular_structure(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.prevout.is_null() {
            return Err(TransactionError::NullOutpointInRegularTx(i));
        }
        if !seen.insert(input.prevout) {
            return Err(TransactionError::DuplicateInput(input.prevout.to_string()));
        }
    }
    Ok(())
}

/// Validate a transaction against a UTXO view (contextual).
///
/// Performs the structural checks, then per input: the referenced UTXO must
/// exist and be mature at `spend_height`, and its locking script must be
/// satisfied by the input's unlocking script. Input and output totals are
/// summed with overflow checks; the fee must be non-negative.
///
/// `spend_height` is the height of the block this transaction would be
/// included in (for mempool admission, the height after the current tip).
///
/// Coinbase transactions cannot be validated standalone; pass regular
/// transactions only.
pub fn validate_transaction<F>(
    tx: &Transaction,
    get_utxo: F,
    spend_height: u64,
) -> Result<ValidatedTransaction, TransactionError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    if tx.is_coinbase() {
        return Err(TransactionError::InvalidCoinbase(
            "coinbase cannot be contextually validated standalone".into(),
        ));
    }

    validate_transaction_structure(tx)?;

    let mut total_input: Amount = 0;

    for (i, input) in tx.inputs.iter().enumerate() {
        let utxo = get_utxo(&input.prevout)
            .ok_or_else(|| TransactionError::UnknownUtxo(input.prevout.to_string()))?;

        // Maturity is measured against the tip preceding the spend.
        if utxo.is_coinbase && !utxo.is_mature(spend_height.saturating_sub(1)) {
            return Err(TransactionError::ImmatureCoinbase { index: i });
        }

        let checker = TransactionSignatureChecker { tx, input_index: i };
        script::verify_script(&input.script_sig, &utxo.output.script_pubkey, &checker)
            .map_err(|source| TransactionError::Script { index: i, source })?;

        total_input = total_input
            .checked_add(utxo.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx.total_output_value().ok_or(TransactionError::ValueOverflow)?;

    if total_input < total_output {
        return Err(TransactionError::InsufficientFunds {
            have: total_input,
            need: total_output,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee: total_input - total_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, COINBASE_MATURITY, MAX_MONEY};
    use crate::crypto::KeyPair;
    use crate::script::{p2pkh_script, p2pkh_script_sig};
    use crate::sighash::{SIGHASH_ALL, signature_hash};
    use crate::types::{Hash256, TxInput, TxOutput};
    use std::collections::HashMap;

    fn make_utxo(value: i64, lock: Vec<u8>, height: u64, is_coinbase: bool) -> UtxoEntry {
        UtxoEntry {
            output: TxOutput { value, script_pubkey: lock },
            height,
            is_coinbase,
        }
    }

    /// Build and sign a one-input P2PKH spend of `outpoint`.
    fn make_signed_tx(kp: &KeyPair, outpoint: OutPoint, lock: &[u8], output_value: i64) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: outpoint, script_sig: vec![], sequence: u32::MAX }],
            outputs: vec![TxOutput { value: output_value, script_pubkey: vec![0x51] }],
            locktime: 0,
        };
        let digest = signature_hash(&tx, 0, lock, SIGHASH_ALL).unwrap();
        let mut sig = kp.sign(digest.as_bytes()).to_vec();
        sig.push(SIGHASH_ALL);
        tx.inputs[0].script_sig = p2pkh_script_sig(&sig, &kp.public_key().to_bytes());
        tx
    }

    fn coinbase(value: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x01],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { value, script_pubkey: vec![0x51] }],
            locktime: 0,
        }
    }

    // --- structural ---

    #[test]
    fn empty_inputs_rejected() {
        let tx = Transaction { version: 1, inputs: vec![], outputs: vec![], locktime: 0 };
        assert_eq!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::EmptyInputsOrOutputs
        );
    }

    #[test]
    fn negative_output_rejected() {
        let mut tx = coinbase(50 * COIN);
        tx.outputs[0].value = -1;
        assert_eq!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::ValueOutOfRange { index: 0 }
        );
    }

    #[test]
    fn above_max_money_rejected() {
        let mut tx = coinbase(50 * COIN);
        tx.outputs[0].value = MAX_MONEY + 1;
        assert_eq!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::ValueOutOfRange { index: 0 }
        );
    }

    #[test]
    fn output_total_must_stay_in_range() {
        let mut tx = coinbase(MAX_MONEY);
        tx.outputs.push(TxOutput { value: 1, script_pubkey: vec![] });
        assert_eq!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::ValueOverflow
        );
    }

    #[test]
    fn zero_value_output_allowed() {
        let mut tx = coinbase(0);
        tx.outputs[0].value = 0;
        assert!(validate_transaction_structure(&tx).is_ok());
    }

    #[test]
    fn coinbase_script_sig_bounded() {
        let mut tx = coinbase(50 * COIN);
        tx.inputs[0].script_sig = vec![0; MAX_COINBASE_SCRIPT_SIG + 1];
        assert!(matches!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::InvalidCoinbase(_)
        ));
    }

    #[test]
    fn regular_tx_rejects_null_prevout() {
        let mut tx = coinbase(50 * COIN);
        tx.inputs.push(TxInput {
            prevout: OutPoint::new(Hash256([1; 32]), 0),
            script_sig: vec![],
            sequence: u32::MAX,
        });
        // Two inputs, one null: not a coinbase, so the null input is illegal.
        assert_eq!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::NullOutpointInRegularTx(0)
        );
    }

    #[test]
    fn duplicate_inputs_rejected() {
        let op = OutPoint::new(Hash256([1; 32]), 0);
        let tx = Transaction {
            version: 1,
            inputs: vec![
                TxInput { prevout: op, script_sig: vec![], sequence: u32::MAX },
                TxInput { prevout: op, script_sig: vec![], sequence: u32::MAX },
            ],
            outputs: vec![TxOutput { value: 1, script_pubkey: vec![] }],
            locktime: 0,
        };
        assert!(matches!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::DuplicateInput(_)
        ));
    }

    #[test]
    fn oversized_tx_rejected() {
        let mut tx = coinbase(50 * COIN);
        tx.inputs[0].script_sig = vec![];
        tx.outputs[0].script_pubkey = vec![0; MAX_TX_SIZE];
        assert!(matches!(
            validate_transaction_structure(&tx).unwrap_err(),
            TransactionError::OversizedTransaction { .. }
        ));
    }

    // --- contextual ---

    #[test]
    fn valid_p2pkh_spend() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);

        let mut utxos = HashMap::new();
        utxos.insert(op, make_utxo(50 * COIN, lock.clone(), 1, false));

        let tx = make_signed_tx(&kp, op, &lock, 49 * COIN);
        let validated = validate_transaction(&tx, |o| utxos.get(o).cloned(), 10).unwrap();

        assert_eq!(validated.total_input, 50 * COIN);
        assert_eq!(validated.total_output, 49 * COIN);
        assert_eq!(validated.fee, COIN);
    }

    #[test]
    fn unknown_utxo_rejected() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);
        let tx = make_signed_tx(&kp, op, &lock, 49 * COIN);

        let err = validate_transaction(&tx, |_| None, 10).unwrap_err();
        assert!(matches!(err, TransactionError::UnknownUtxo(_)));
    }

    #[test]
    fn wrong_signer_rejected() {
        let kp = KeyPair::generate();
        let thief = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);

        let mut utxos = HashMap::new();
        utxos.insert(op, make_utxo(50 * COIN, lock.clone(), 1, false));

        let tx = make_signed_tx(&thief, op, &lock, 49 * COIN);
        let err = validate_transaction(&tx, |o| utxos.get(o).cloned(), 10).unwrap_err();
        assert!(matches!(err, TransactionError::Script { index: 0, .. }));
    }

    #[test]
    fn immature_coinbase_rejected_then_accepted() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);

        let mut utxos = HashMap::new();
        utxos.insert(op, make_utxo(50 * COIN, lock.clone(), 1, true));
        let tx = make_signed_tx(&kp, op, &lock, 49 * COIN);

        // Spending at height 2: far too early.
        let err = validate_transaction(&tx, |o| utxos.get(o).cloned(), 2).unwrap_err();
        assert_eq!(err, TransactionError::ImmatureCoinbase { index: 0 });

        // Exactly one short of maturity still fails.
        let err = validate_transaction(&tx, |o| utxos.get(o).cloned(), COINBASE_MATURITY).unwrap_err();
        assert_eq!(err, TransactionError::ImmatureCoinbase { index: 0 });

        // At spend height 1 + COINBASE_MATURITY the output has matured.
        assert!(validate_transaction(&tx, |o| utxos.get(o).cloned(), 1 + COINBASE_MATURITY + 1).is_ok());
    }

    #[test]
    fn outputs_exceeding_inputs_rejected() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);

        let mut utxos = HashMap::new();
        utxos.insert(op, make_utxo(10 * COIN, lock.clone(), 1, false));

        let tx = make_signed_tx(&kp, op, &lock, 11 * COIN);
        let err = validate_transaction(&tx, |o| utxos.get(o).cloned(), 10).unwrap_err();
        assert_eq!(
            err,
            TransactionError::InsufficientFunds { have: 10 * COIN, need: 11 * COIN }
        );
    }

    #[test]
    fn exact_spend_has_zero_fee() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let op = OutPoint::new(Hash256([1; 32]), 0);

        let mut utxos = HashMap::new();
        utxos.insert(op, make_utxo(5 * COIN, lock.clone(), 1, false));

        let tx = make_signed_tx(&kp, op, &lock, 5 * COIN);
        let validated = validate_transaction(&tx, |o| utxos.get(o).cloned(), 10).unwrap();
        assert_eq!(validated.fee, 0);
    }

    #[test]
    fn coinbase_not_contextually_validatable() {
        let tx = coinbase(50 * COIN);
        assert!(matches!(
            validate_transaction(&tx, |_| None, 10).unwrap_err(),
            TransactionError::InvalidCoinbase(_)
        ));
    }
}
