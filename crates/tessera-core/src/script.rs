//! Stack-machine evaluator for output-locking scripts.
//!
//! Scripts are byte strings mixing data pushes with opcodes. An output's
//! `script_pubkey` locks it; the spending input's `script_sig` must leave the
//! stack in a state that satisfies the lock. [`verify_script`] evaluates
//! `script_sig || OP_CODESEPARATOR || script_pubkey` and succeeds iff the
//! final top of stack is truthy.
//!
//! Signature checking is delegated through [`SignatureChecker`] so the
//! evaluator stays independent of transaction context. Signatures on the
//! wire are the 64-byte Ed25519 form with a one-byte sighash flag appended.

use crate::constants::{
    MAX_OPS_PER_SCRIPT, MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE,
    MAX_STACK_SIZE,
};
use crate::crypto::PublicKey;
use crate::error::ScriptError;
use crate::sighash::signature_hash;
use crate::types::Transaction;

/// Opcode byte values. Pushes below [`OP_PUSHDATA1`] carry their own length.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4C;
    pub const OP_PUSHDATA2: u8 = 0x4D;
    pub const OP_PUSHDATA4: u8 = 0x4E;
    pub const OP_1NEGATE: u8 = 0x4F;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;

    pub const OP_NOP: u8 = 0x61;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6A;

    pub const OP_2DUP: u8 = 0x6E;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_NIP: u8 = 0x77;
    pub const OP_OVER: u8 = 0x78;
    pub const OP_ROT: u8 = 0x7B;
    pub const OP_SWAP: u8 = 0x7C;
    pub const OP_SIZE: u8 = 0x82;

    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;

    pub const OP_1ADD: u8 = 0x8B;
    pub const OP_1SUB: u8 = 0x8C;
    pub const OP_NEGATE: u8 = 0x8F;
    pub const OP_ABS: u8 = 0x90;
    pub const OP_NOT: u8 = 0x91;
    pub const OP_ADD: u8 = 0x93;
    pub const OP_SUB: u8 = 0x94;
    pub const OP_BOOLAND: u8 = 0x9A;
    pub const OP_BOOLOR: u8 = 0x9B;
    pub const OP_NUMEQUAL: u8 = 0x9C;
    pub const OP_NUMEQUALVERIFY: u8 = 0x9D;
    pub const OP_LESSTHAN: u8 = 0x9F;
    pub const OP_GREATERTHAN: u8 = 0xA0;
    pub const OP_MIN: u8 = 0xA3;
    pub const OP_MAX: u8 = 0xA4;
    pub const OP_WITHIN: u8 = 0xA5;

    pub const OP_RIPEMD160: u8 = 0xA6;
    pub const OP_SHA256: u8 = 0xA8;
    pub const OP_HASH160: u8 = 0xA9;
    pub const OP_HASH256: u8 = 0xAA;
    pub const OP_CODESEPARATOR: u8 = 0xAB;
    pub const OP_CHECKSIG: u8 = 0xAC;
    pub const OP_CHECKSIGVERIFY: u8 = 0xAD;
    pub const OP_CHECKMULTISIG: u8 = 0xAE;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xAF;
}

use opcodes::*;

/// Verifies signatures for the script evaluator.
pub trait SignatureChecker {
    /// Check `signature` (64-byte Ed25519 plus trailing sighash flag) against
    /// `public_key` for the script code currently in effect.
    fn check_sig(&self, signature: &[u8], public_key: &[u8], script_code: &[u8]) -> bool;
}

/// A checker that rejects every signature. Useful for evaluating scripts
/// with no signature operations.
pub struct NoSignatures;

impl SignatureChecker for NoSignatures {
    fn check_sig(&self, _: &[u8], _: &[u8], _: &[u8]) -> bool {
        false
    }
}

/// Checks signatures against a spending transaction and input index.
pub struct TransactionSignatureChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_sig(&self, signature: &[u8], public_key: &[u8], script_code: &[u8]) -> bool {
        // Split the trailing sighash flag off the raw signature.
        let Some((&flag, sig)) = signature.split_last() else {
            return false;
        };
        if sig.len() != 64 {
            return false;
        }
        let Ok(pubkey) = PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(digest) = signature_hash(self.tx, self.input_index, script_code, flag) else {
            return false;
        };
        pubkey.verify_slice(digest.as_bytes(), sig).is_ok()
    }
}

/// Minimal script-number codec: little-endian sign-magnitude, at most four
/// bytes on input.
fn parse_num(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.len() > 4 {
        return Err(ScriptError::NumberOverflow);
    }
    if bytes.is_empty() {
        return Ok(0);
    }

    let mut value: i64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as i64) << (8 * i);
    }

    // The high bit of the last byte is the sign.
    let last = *bytes.last().unwrap();
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -(value & mask);
    }
    Ok(value)
}

fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xFF) as u8);
        abs >>= 8;
    }

    // Ensure the sign bit has room; add a padding byte if the top bit is set.
    if out.last().unwrap() & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        *out.last_mut().unwrap() |= 0x80;
    }
    out
}

/// Script truthiness: nonzero, ignoring a lone sign bit (negative zero).
fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, &b) in bytes.iter().enumerate() {
        if b != 0 {
            // Negative zero: sign bit alone in the final byte.
            if i == bytes.len() - 1 && b == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

fn push_bool(stack: &mut Vec<Vec<u8>>, value: bool) {
    stack.push(if value { vec![1] } else { Vec::new() });
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow)
}

fn pop_num(stack: &mut Vec<Vec<u8>>) -> Result<i64, ScriptError> {
    let item = pop(stack)?;
    parse_num(&item)
}

/// Evaluate a single script against the given stack.
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<Vec<u8>>,
    checker: &dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptTooLarge { size: script.len(), max: MAX_SCRIPT_SIZE });
    }

    let mut pc = 0usize;
    let mut op_count = 0usize;
    let mut last_separator = 0usize;

    while pc < script.len() {
        let opcode = script[pc];
        pc += 1;

        // --- data pushes ---
        if opcode <= OP_PUSHDATA4 {
            let len = match opcode {
                OP_0 => 0,
                OP_PUSHDATA1 => {
                    let b = *script.get(pc).ok_or(ScriptError::TruncatedPush)?;
                    pc += 1;
                    b as usize
                }
                OP_PUSHDATA2 => {
                    let bytes = script.get(pc..pc + 2).ok_or(ScriptError::TruncatedPush)?;
                    pc += 2;
                    u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                }
                OP_PUSHDATA4 => {
                    let bytes = script.get(pc..pc + 4).ok_or(ScriptError::TruncatedPush)?;
                    pc += 4;
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                direct => direct as usize,
            };

            if len > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushTooLarge { size: len });
            }
            let data = script.get(pc..pc + len).ok_or(ScriptError::TruncatedPush)?;
            pc += len;
            stack.push(data.to_vec());
            check_stack_size(stack)?;
            continue;
        }

        // --- constant pushes ---
        if opcode == OP_1NEGATE {
            stack.push(encode_num(-1));
            check_stack_size(stack)?;
            continue;
        }
        if (OP_1..=OP_16).contains(&opcode) {
            stack.push(encode_num((opcode - OP_1 + 1) as i64));
            check_stack_size(stack)?;
            continue;
        }

        op_count += 1;
        if op_count > MAX_OPS_PER_SCRIPT {
            return Err(ScriptError::OpCountExceeded);
        }

        match opcode {
            OP_NOP => {}
            OP_RETURN => return Err(ScriptError::EarlyReturn),

            OP_VERIFY => {
                let top = pop(stack)?;
                if !cast_to_bool(&top) {
                    return Err(ScriptError::VerifyFailed);
                }
            }

            // --- stack manipulation ---
            OP_DROP => {
                pop(stack)?;
            }
            OP_DUP => {
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                stack.push(top);
            }
            OP_2DUP => {
                if stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                let a = stack[stack.len() - 2].clone();
                let b = stack[stack.len() - 1].clone();
                stack.push(a);
                stack.push(b);
            }
            OP_NIP => {
                if stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                stack.remove(stack.len() - 2);
            }
            OP_OVER => {
                if stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                let item = stack[stack.len() - 2].clone();
                stack.push(item);
            }
            OP_ROT => {
                if stack.len() < 3 {
                    return Err(ScriptError::StackUnderflow);
                }
                let item = stack.remove(stack.len() - 3);
                stack.push(item);
            }
            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                let len = stack.len();
                stack.swap(len - 2, len - 1);
            }
            OP_SIZE => {
                let len = stack.last().ok_or(ScriptError::StackUnderflow)?.len();
                stack.push(encode_num(len as i64));
            }

            // --- equality ---
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                let equal = a == b;
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    push_bool(stack, equal);
                }
            }

            // --- unary arithmetic ---
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT => {
                let n = pop_num(stack)?;
                match opcode {
                    OP_1ADD => stack.push(encode_num(n + 1)),
                    OP_1SUB => stack.push(encode_num(n - 1)),
                    OP_NEGATE => stack.push(encode_num(-n)),
                    OP_ABS => stack.push(encode_num(n.abs())),
                    OP_NOT => push_bool(stack, n == 0),
                    _ => unreachable!(),
                }
            }

            // --- binary arithmetic / comparison ---
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_LESSTHAN | OP_GREATERTHAN | OP_MIN | OP_MAX => {
                let b = pop_num(stack)?;
                let a = pop_num(stack)?;
                match opcode {
                    OP_ADD => stack.push(encode_num(a + b)),
                    OP_SUB => stack.push(encode_num(a - b)),
                    OP_BOOLAND => push_bool(stack, a != 0 && b != 0),
                    OP_BOOLOR => push_bool(stack, a != 0 || b != 0),
                    OP_NUMEQUAL => push_bool(stack, a == b),
                    OP_NUMEQUALVERIFY => {
                        if a != b {
                            return Err(ScriptError::VerifyFailed);
                        }
                    }
                    OP_LESSTHAN => push_bool(stack, a < b),
                    OP_GREATERTHAN => push_bool(stack, a > b),
                    OP_MIN => stack.push(encode_num(a.min(b))),
                    OP_MAX => stack.push(encode_num(a.max(b))),
                    _ => unreachable!(),
                }
            }

            OP_WITHIN => {
                let max = pop_num(stack)?;
                let min = pop_num(stack)?;
                let x = pop_num(stack)?;
                push_bool(stack, min <= x && x < max);
            }

            // --- hashing ---
            OP_RIPEMD160 => {
                use ripemd::Digest as _;
                let item = pop(stack)?;
                let digest: [u8; 20] = ripemd::Ripemd160::digest(&item).into();
                stack.push(digest.to_vec());
            }
            OP_SHA256 => {
                use sha2::Digest as _;
                let item = pop(stack)?;
                let digest: [u8; 32] = sha2::Sha256::digest(&item).into();
                stack.push(digest.to_vec());
            }
            OP_HASH160 => {
                let item = pop(stack)?;
                stack.push(crate::hashes::hash160(&item).to_vec());
            }
            OP_HASH256 => {
                let item = pop(stack)?;
                stack.push(crate::hashes::sha256d(&item).to_vec());
            }

            OP_CODESEPARATOR => {
                last_separator = pc;
            }

            // --- signatures ---
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = pop(stack)?;
                let sig = pop(stack)?;
                let script_code = &script[last_separator..];
                let ok = !sig.is_empty() && checker.check_sig(&sig, &pubkey, script_code);
                if opcode == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    push_bool(stack, ok);
                }
            }

            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let key_count = pop_num(stack)?;
                if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
                    return Err(ScriptError::PubkeyCount);
                }
                let key_count = key_count as usize;
                op_count += key_count;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCountExceeded);
                }

                let mut pubkeys = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    pubkeys.push(pop(stack)?);
                }

                let sig_count = pop_num(stack)?;
                if sig_count < 0 || sig_count as usize > key_count {
                    return Err(ScriptError::SigCount);
                }
                let sig_count = sig_count as usize;

                let mut sigs = Vec::with_capacity(sig_count);
                for _ in 0..sig_count {
                    sigs.push(pop(stack)?);
                }

                // Legacy multisig consumes one extra stack element.
                pop(stack)?;

                // Each signature must match a key; keys are consumed in order,
                // so signatures must appear in key order.
                let script_code = &script[last_separator..];
                let mut key_iter = pubkeys.iter();
                let mut ok = true;
                for sig in &sigs {
                    let mut matched = false;
                    for key in key_iter.by_ref() {
                        if !sig.is_empty() && checker.check_sig(sig, key, script_code) {
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        ok = false;
                        break;
                    }
                }

                if opcode == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    push_bool(stack, ok);
                }
            }

            other => return Err(ScriptError::BadOpcode(other)),
        }

        check_stack_size(stack)?;
    }

    Ok(())
}

fn check_stack_size(stack: &[Vec<u8>]) -> Result<(), ScriptError> {
    if stack.len() > MAX_STACK_SIZE {
        return Err(ScriptError::StackOverflow);
    }
    Ok(())
}

/// Verify an unlocking script against a locking script.
///
/// Evaluates `script_sig || OP_CODESEPARATOR || script_pubkey` on a fresh
/// stack; succeeds iff evaluation completes and the final top of stack is
/// truthy.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    checker: &dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if script_sig.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptTooLarge { size: script_sig.len(), max: MAX_SCRIPT_SIZE });
    }
    if script_pubkey.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptTooLarge {
            size: script_pubkey.len(),
            max: MAX_SCRIPT_SIZE,
        });
    }

    let mut combined = Vec::with_capacity(script_sig.len() + 1 + script_pubkey.len());
    combined.extend_from_slice(script_sig);
    combined.push(OP_CODESEPARATOR);
    combined.extend_from_slice(script_pubkey);

    let mut stack = Vec::new();
    eval_script(&combined, &mut stack, checker)?;

    match stack.last() {
        Some(top) if cast_to_bool(top) => Ok(()),
        _ => Err(ScriptError::EvalFalse),
    }
}

/// Build a minimal data push for `data`.
pub fn push_data(data: &[u8], out: &mut Vec<u8>) {
    match data.len() {
        0 => out.push(OP_0),
        1..=0x4B => {
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }
        0x4C..=0xFF => {
            out.push(OP_PUSHDATA1);
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }
        _ => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
    }
}

/// The standard pay-to-pubkey-hash locking script:
/// `OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(pubkey_hash, &mut script);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// The unlocking script for a P2PKH output: `<sig+flag> <pubkey>`.
pub fn p2pkh_script_sig(signature_with_flag: &[u8], public_key: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(signature_with_flag.len() + 34 + 2);
    push_data(signature_with_flag, &mut script);
    push_data(public_key, &mut script);
    script
}

/// Extract the pushed items of a script that consists only of data pushes.
/// Returns `None` if any non-push opcode appears or a push is truncated.
pub fn parse_pushes(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    let mut pc = 0usize;
    while pc < script.len() {
        let opcode = script[pc];
        pc += 1;
        let len = match opcode {
            OP_0 => 0,
            n @ 0x01..=0x4B => n as usize,
            OP_PUSHDATA1 => {
                let b = *script.get(pc)?;
                pc += 1;
                b as usize
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(pc..pc + 2)?;
                pc += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            _ => return None,
        };
        let data = script.get(pc..pc + len)?;
        pc += len;
        items.push(data.to_vec());
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::sighash::SIGHASH_ALL;
    use crate::types::{Hash256, OutPoint, TxInput, TxOutput};

    fn eval(script: &[u8]) -> Result<Vec<Vec<u8>>, ScriptError> {
        let mut stack = Vec::new();
        eval_script(script, &mut stack, &NoSignatures)?;
        Ok(stack)
    }

    // --- script numbers ---

    #[test]
    fn num_zero_is_empty() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(parse_num(&[]).unwrap(), 0);
    }

    #[test]
    fn num_round_trips() {
        for n in [1i64, -1, 127, -127, 128, -128, 255, 256, -256, 0x7FFF_FFFF, -0x7FFF_FFFF] {
            assert_eq!(parse_num(&encode_num(n)).unwrap(), n, "n={n}");
        }
    }

    #[test]
    fn num_sign_padding() {
        // 128 needs a padding byte so the sign bit stays clear.
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-128), vec![0x80, 0x80]);
    }

    #[test]
    fn num_too_wide_rejected() {
        assert_eq!(
            parse_num(&[1, 2, 3, 4, 5]).unwrap_err(),
            ScriptError::NumberOverflow
        );
    }

    #[test]
    fn bool_casting() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0]));
        assert!(!cast_to_bool(&[0, 0]));
        assert!(!cast_to_bool(&[0x80])); // negative zero
        assert!(!cast_to_bool(&[0, 0x80]));
        assert!(cast_to_bool(&[1]));
        assert!(cast_to_bool(&[0x80, 0])); // 0x80 not in final position
    }

    // --- pushes ---

    #[test]
    fn direct_push() {
        let stack = eval(&[3, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(stack, vec![vec![0xAA, 0xBB, 0xCC]]);
    }

    #[test]
    fn op_0_pushes_empty() {
        assert_eq!(eval(&[OP_0]).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn op_n_pushes_small_numbers() {
        let stack = eval(&[OP_1, OP_16]).unwrap();
        assert_eq!(stack, vec![vec![1], vec![16]]);
    }

    #[test]
    fn op_1negate() {
        assert_eq!(eval(&[OP_1NEGATE]).unwrap(), vec![vec![0x81]]);
    }

    #[test]
    fn pushdata1() {
        let mut script = vec![OP_PUSHDATA1, 2, 0x11, 0x22];
        assert_eq!(eval(&script).unwrap(), vec![vec![0x11, 0x22]]);
        script.pop();
        assert_eq!(eval(&script).unwrap_err(), ScriptError::TruncatedPush);
    }

    #[test]
    fn pushdata2() {
        let mut script = vec![OP_PUSHDATA2, 3, 0];
        script.extend_from_slice(&[9, 9, 9]);
        assert_eq!(eval(&script).unwrap(), vec![vec![9, 9, 9]]);
    }

    #[test]
    fn truncated_direct_push() {
        assert_eq!(eval(&[5, 1, 2]).unwrap_err(), ScriptError::TruncatedPush);
    }

    #[test]
    fn oversized_push_rejected() {
        let mut script = vec![OP_PUSHDATA2];
        script.extend_from_slice(&(600u16).to_le_bytes());
        script.extend_from_slice(&[0; 600]);
        assert_eq!(
            eval(&script).unwrap_err(),
            ScriptError::PushTooLarge { size: 600 }
        );
    }

    // --- stack ops ---

    #[test]
    fn dup_swap_drop() {
        let stack = eval(&[OP_1, OP_DUP]).unwrap();
        assert_eq!(stack, vec![vec![1], vec![1]]);

        // 0x52 is OP_2.
        let stack = eval(&[OP_1, 0x52, OP_SWAP]).unwrap();
        assert_eq!(stack, vec![vec![2], vec![1]]);

        let stack = eval(&[OP_1, OP_DROP]).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn rot_moves_third_to_top() {
        let stack = eval(&[OP_1, 0x52, 0x53, OP_ROT]).unwrap();
        assert_eq!(stack, vec![vec![2], vec![3], vec![1]]);
    }

    #[test]
    fn size_reports_length() {
        let stack = eval(&[3, 7, 8, 9, OP_SIZE]).unwrap();
        assert_eq!(stack, vec![vec![7, 8, 9], vec![3]]);
    }

    #[test]
    fn underflow_detected() {
        assert_eq!(eval(&[OP_DROP]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(eval(&[OP_ADD]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(eval(&[OP_1, OP_SWAP]).unwrap_err(), ScriptError::StackUnderflow);
    }

    // --- arithmetic ---

    #[test]
    fn add_sub() {
        assert_eq!(eval(&[0x52, 0x53, OP_ADD]).unwrap(), vec![vec![5]]);
        assert_eq!(eval(&[0x53, 0x52, OP_SUB]).unwrap(), vec![vec![1]]);
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval(&[OP_1, 0x52, OP_LESSTHAN]).unwrap(), vec![vec![1]]);
        assert_eq!(eval(&[OP_1, 0x52, OP_GREATERTHAN]).unwrap(), vec![Vec::<u8>::new()]);
        assert_eq!(eval(&[0x52, 0x52, OP_NUMEQUAL]).unwrap(), vec![vec![1]]);
    }

    #[test]
    fn min_max_within() {
        assert_eq!(eval(&[0x52, 0x55, OP_MIN]).unwrap(), vec![vec![2]]);
        assert_eq!(eval(&[0x52, 0x55, OP_MAX]).unwrap(), vec![vec![5]]);
        // 3 within [2, 5) -> true; 5 within [2, 5) -> false
        assert_eq!(eval(&[0x53, 0x52, 0x55, OP_WITHIN]).unwrap(), vec![vec![1]]);
        assert_eq!(eval(&[0x55, 0x52, 0x55, OP_WITHIN]).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn not_and_bool_ops() {
        assert_eq!(eval(&[OP_0, OP_NOT]).unwrap(), vec![vec![1]]);
        assert_eq!(eval(&[OP_1, OP_NOT]).unwrap(), vec![Vec::<u8>::new()]);
        assert_eq!(eval(&[OP_1, OP_0, OP_BOOLAND]).unwrap(), vec![Vec::<u8>::new()]);
        assert_eq!(eval(&[OP_1, OP_0, OP_BOOLOR]).unwrap(), vec![vec![1]]);
    }

    // --- verify / return ---

    #[test]
    fn verify_consumes_and_checks() {
        assert_eq!(eval(&[OP_1, OP_VERIFY]).unwrap(), Vec::<Vec<u8>>::new());
        assert_eq!(eval(&[OP_0, OP_VERIFY]).unwrap_err(), ScriptError::VerifyFailed);
    }

    #[test]
    fn return_aborts() {
        assert_eq!(eval(&[OP_RETURN]).unwrap_err(), ScriptError::EarlyReturn);
    }

    // --- equality and hashing ---

    #[test]
    fn equal_and_equalverify() {
        assert_eq!(eval(&[OP_1, OP_1, OP_EQUAL]).unwrap(), vec![vec![1]]);
        assert_eq!(eval(&[OP_1, 0x52, OP_EQUAL]).unwrap(), vec![Vec::<u8>::new()]);
        assert_eq!(
            eval(&[OP_1, 0x52, OP_EQUALVERIFY]).unwrap_err(),
            ScriptError::VerifyFailed
        );
    }

    #[test]
    fn hash_opcodes() {
        let mut script = vec![3, b'a', b'b', b'c', OP_SHA256];
        let stack = eval(&script).unwrap();
        use sha2::Digest as _;
        let expected: [u8; 32] = sha2::Sha256::digest(b"abc").into();
        assert_eq!(stack[0], expected.to_vec());

        script = vec![3, b'a', b'b', b'c', OP_HASH160];
        assert_eq!(eval(&script).unwrap()[0], crate::hashes::hash160(b"abc").to_vec());

        script = vec![3, b'a', b'b', b'c', OP_HASH256];
        assert_eq!(eval(&script).unwrap()[0], crate::hashes::sha256d(b"abc").to_vec());
    }

    // --- limits ---

    #[test]
    fn op_count_limit() {
        let script = vec![OP_NOP; MAX_OPS_PER_SCRIPT + 1];
        assert_eq!(eval(&script).unwrap_err(), ScriptError::OpCountExceeded);
    }

    #[test]
    fn script_size_limit() {
        let script = vec![OP_NOP; MAX_SCRIPT_SIZE + 1];
        assert!(matches!(
            eval(&script).unwrap_err(),
            ScriptError::ScriptTooLarge { .. }
        ));
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(eval(&[0xFF]).unwrap_err(), ScriptError::BadOpcode(0xFF));
        // Conditionals are outside the supported set.
        assert_eq!(eval(&[0x63]).unwrap_err(), ScriptError::BadOpcode(0x63));
    }

    // --- verify_script / P2PKH ---

    fn single_input_tx(script_pubkey: &[u8]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint::new(Hash256([0x11; 32]), 0),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { value: 40, script_pubkey: script_pubkey.to_vec() }],
            locktime: 0,
        }
    }

    fn sign_p2pkh_input(tx: &Transaction, input_index: usize, kp: &KeyPair, lock: &[u8]) -> Vec<u8> {
        let digest = signature_hash(tx, input_index, lock, SIGHASH_ALL).unwrap();
        let mut sig = kp.sign(digest.as_bytes()).to_vec();
        sig.push(SIGHASH_ALL);
        p2pkh_script_sig(&sig, &kp.public_key().to_bytes())
    }

    #[test]
    fn p2pkh_spend_verifies() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let tx = single_input_tx(&lock);
        let script_sig = sign_p2pkh_input(&tx, 0, &kp, &lock);

        let checker = TransactionSignatureChecker { tx: &tx, input_index: 0 };
        assert!(verify_script(&script_sig, &lock, &checker).is_ok());
    }

    #[test]
    fn p2pkh_wrong_key_fails() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let tx = single_input_tx(&lock);
        // Signed by the wrong key: pubkey hash check fails first.
        let script_sig = sign_p2pkh_input(&tx, 0, &other, &lock);

        let checker = TransactionSignatureChecker { tx: &tx, input_index: 0 };
        assert!(verify_script(&script_sig, &lock, &checker).is_err());
    }

    #[test]
    fn p2pkh_tampered_tx_fails() {
        let kp = KeyPair::generate();
        let lock = p2pkh_script(&kp.address());
        let tx = single_input_tx(&lock);
        let script_sig = sign_p2pkh_input(&tx, 0, &kp, &lock);

        let mut tampered = tx.clone();
        tampered.outputs[0].value = 9_999;
        let checker = TransactionSignatureChecker { tx: &tampered, input_index: 0 };
        assert_eq!(
            verify_script(&script_sig, &lock, &checker).unwrap_err(),
            ScriptError::EvalFalse
        );
    }

    #[test]
    fn empty_scripts_fail_cleanly() {
        assert_eq!(
            verify_script(&[], &[], &NoSignatures).unwrap_err(),
            ScriptError::EvalFalse
        );
    }

    #[test]
    fn anyone_can_spend_true_script() {
        assert!(verify_script(&[], &[OP_1], &NoSignatures).is_ok());
    }

    // --- multisig ---

    fn multisig_lock(m: u8, keys: &[&KeyPair]) -> Vec<u8> {
        let mut lock = vec![OP_1 + m - 1];
        for kp in keys {
            push_data(&kp.public_key().to_bytes(), &mut lock);
        }
        lock.push(OP_1 + keys.len() as u8 - 1);
        lock.push(OP_CHECKMULTISIG);
        lock
    }

    fn multisig_sig(tx: &Transaction, lock: &[u8], signers: &[&KeyPair]) -> Vec<u8> {
        let digest = signature_hash(tx, 0, lock, SIGHASH_ALL).unwrap();
        // Extra leading element consumed by the legacy multisig pop.
        let mut script_sig = vec![OP_0];
        for kp in signers {
            let mut sig = kp.sign(digest.as_bytes()).to_vec();
            sig.push(SIGHASH_ALL);
            push_data(&sig, &mut script_sig);
        }
        script_sig
    }

    #[test]
    fn two_of_three_multisig_verifies() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let k3 = KeyPair::generate();
        let lock = multisig_lock(2, &[&k1, &k2, &k3]);
        let tx = single_input_tx(&lock);

        // Signatures in key order: k1 then k3.
        let script_sig = multisig_sig(&tx, &lock, &[&k1, &k3]);
        let checker = TransactionSignatureChecker { tx: &tx, input_index: 0 };
        assert!(verify_script(&script_sig, &lock, &checker).is_ok());
    }

    #[test]
    fn multisig_out_of_order_sigs_fail() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let k3 = KeyPair::generate();
        let lock = multisig_lock(2, &[&k1, &k2, &k3]);
        let tx = single_input_tx(&lock);

        // k3 before k1 violates key order.
        let script_sig = multisig_sig(&tx, &lock, &[&k3, &k1]);
        let checker = TransactionSignatureChecker { tx: &tx, input_index: 0 };
        assert!(verify_script(&script_sig, &lock, &checker).is_err());
    }

    #[test]
    fn multisig_insufficient_sigs_fail() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let lock = multisig_lock(2, &[&k1, &k2]);
        let tx = single_input_tx(&lock);

        let script_sig = multisig_sig(&tx, &lock, &[&k1]);
        let checker = TransactionSignatureChecker { tx: &tx, input_index: 0 };
        assert!(verify_script(&script_sig, &lock, &checker).is_err());
    }

    // --- push helpers ---

    #[test]
    fn parse_pushes_extracts_items() {
        let mut script = Vec::new();
        push_data(b"first", &mut script);
        push_data(&[0u8; 80], &mut script);
        let items = parse_pushes(&script).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], b"first");
        assert_eq!(items[1].len(), 80);
    }

    #[test]
    fn parse_pushes_rejects_opcodes() {
        assert!(parse_pushes(&[OP_DUP]).is_none());
    }

    #[test]
    fn p2pkh_script_shape() {
        let script = p2pkh_script(&[0xAB; 20]);
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script[1], OP_HASH160);
        assert_eq!(script[24], OP_CHECKSIG);
    }
}
