//! Legacy proof-of-work arithmetic and block weight.
//!
//! Pre-activation blocks satisfy `hash <= target(bits)` with the compact
//! `nBits` target encoding; their weight approximates the expected hash
//! count for the target. Post-activation blocks carry a large constant
//! weight so that any participation-rule chain outweighs accumulated
//! proof-of-work history and longer participation chains outweigh shorter
//! ones.

use tessera_core::params::ChainParams;
use tessera_core::types::{BlockHeader, Hash256};

/// Weight of one post-activation block. Large enough that a single
/// participation block outweighs any realistic pre-activation work total.
pub const PARTICIPATION_BLOCK_WEIGHT: u128 = 1 << 64;

/// Expand a compact `nBits` value into a 256-bit big-endian target.
///
/// Layout: one exponent byte (target byte length) and a 3-byte mantissa.
/// A set sign bit or zero mantissa yields the zero target, which no hash
/// can satisfy.
pub fn compact_to_target(bits: u32) -> [u8; 32] {
    let mut target = [0u8; 32];
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x00FF_FFFF;

    if mantissa & 0x0080_0000 != 0 || mantissa == 0 {
        return target;
    }

    let bytes = [(mantissa >> 16) as u8, (mantissa >> 8) as u8, mantissa as u8];
    for (i, byte) in bytes.into_iter().enumerate() {
        // Mantissa byte `i` lands `exponent - 1 - i` bytes above the bottom.
        let Some(position) = exponent.checked_sub(1 + i) else { continue };
        if position >= 32 {
            // Exponent overflows the field: saturate to the easiest target.
            return [0xFF; 32];
        }
        target[31 - position] = byte;
    }
    target
}

/// Whether a header hash satisfies its own claimed compact target.
pub fn hash_meets_target(hash: &Hash256, bits: u32) -> bool {
    let target = compact_to_target(bits);
    hash.as_bytes().as_slice() <= target.as_slice()
}

/// Legacy proof-of-work check for a header.
pub fn check_pow(header: &BlockHeader) -> bool {
    hash_meets_target(&header.hash(), header.bits)
}

/// Work contributed by one pre-activation block: the expected number of
/// hashes to meet the target, truncated to the top 128 bits.
pub fn work_from_bits(bits: u32) -> u128 {
    let target = compact_to_target(bits);
    let mut high = [0u8; 16];
    high.copy_from_slice(&target[..16]);
    let high = u128::from_be_bytes(high);
    u128::MAX / high.saturating_add(1)
}

/// Weight a block adds to its chain.
pub fn block_weight(header: &BlockHeader, height: u64, params: &ChainParams) -> u128 {
    if params.participation_active(height) {
        PARTICIPATION_BLOCK_WEIGHT
    } else {
        work_from_bits(header.bits)
    }
}
