//! Signature-hash computation for transaction inputs.
//!
//! The sighash commits to a masked copy of the spending transaction plus the
//! hash-type flag. Masking rules per flag:
//!
//! - Every input's `script_sig` is emptied, then the signed input's is
//!   replaced by the script code (the locking script being satisfied).
//! - `NONE`: outputs are dropped and other inputs' sequences zeroed; the
//!   signer commits to inputs only.
//! - `SINGLE`: outputs are truncated to the signed input's index, earlier
//!   ones blanked (`value = -1`, empty script), other sequences zeroed.
//! - `ANYONECANPAY`: only the signed input is included.
//!
//! The digest is `DSHA256(encode(masked tx) || LE32(flag))`.

use crate::codec::Encodable;
use crate::error::ScriptError;
use crate::hashes::sha256d;
use crate::types::{Hash256, Transaction, TxOutput};

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Compute the signature hash for `input_index` of `tx` under `flag`.
///
/// `script_code` is the locking script being satisfied (the script_pubkey
/// after the last executed code separator).
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    flag: u8,
) -> Result<Hash256, ScriptError> {
    if input_index >= tx.inputs.len() {
        return Err(ScriptError::StackUnderflow);
    }

    let base = flag & 0x1F;
    let anyone_can_pay = flag & SIGHASH_ANYONECANPAY != 0;

    // SINGLE must have a matching output to commit to.
    if base == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        return Err(ScriptError::SighashSingleBug);
    }

    let mut masked = tx.clone();

    // Blank all unlocking scripts, then install the script code on the
    // signed input.
    for input in &mut masked.inputs {
        input.script_sig.clear();
    }
    masked.inputs[input_index].script_sig = script_code.to_vec();

    match base {
        SIGHASH_NONE => {
            masked.outputs.clear();
            zero_other_sequences(&mut masked, input_index);
        }
        SIGHASH_SINGLE => {
            masked.outputs.truncate(input_index + 1);
            for output in &mut masked.outputs[..input_index] {
                *output = TxOutput { value: -1, script_pubkey: Vec::new() };
            }
            zero_other_sequences(&mut masked, input_index);
        }
        _ => {} // ALL: full commitment
    }

    if anyone_can_pay {
        masked.inputs = vec![masked.inputs[input_index].clone()];
    }

    let mut data = masked.encode();
    data.extend_from_slice(&(flag as u32).to_le_bytes());
    Ok(Hash256(sha256d(&data)))
}

fn zero_other_sequences(tx: &mut Transaction, keep: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != keep {
            input.sequence = 0;
        }
    }
}
