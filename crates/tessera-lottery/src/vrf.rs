//! Verifiable random function over Ed25519.
//!
//! The construction is the deterministic-signature VRF: the proof is the
//! Ed25519 signature over the seed, and the output is the double SHA-256 of
//! that signature. RFC 8032 signing is deterministic, so the same key and
//! seed always yield the same output; unforgeability follows from signature
//! unforgeability. Any holder of the public key verifies by checking the
//! signature and recomputing the output.

use tessera_core::crypto::{KeyPair, PublicKey};
use tessera_core::error::LotteryError;
use tessera_core::hashes::sha256d;
use tessera_core::types::Hash256;

/// A VRF proof: the 64-byte Ed25519 signature over the seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VrfProof(pub [u8; 64]);

impl VrfProof {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

/// The lottery seed for producing at `height` on top of `prev_hash`:
/// `prev_block_hash || LE64(height)`.
pub fn lottery_seed(prev_hash: &Hash256, height: u64) -> [u8; 40] {
    let mut seed = [0u8; 40];
    seed[..32].copy_from_slice(prev_hash.as_bytes());
    seed[32..].copy_from_slice(&height.to_le_bytes());
    seed
}

/// Evaluate the VRF: `(output, proof)` for `seed` under `keypair`.
pub fn evaluate(keypair: &KeyPair, seed: &[u8]) -> (Hash256, VrfProof) {
    let signature = keypair.sign(seed);
    let output = Hash256(sha256d(&signature));
    (output, VrfProof(signature))
}

/// Verify that `(output, proof)` is the unique VRF evaluation of `seed`
/// under `public_key`.
pub fn verify(
    public_key: &PublicKey,
    seed: &[u8],
    output: &Hash256,
    proof: &VrfProof,
) -> Result<(), LotteryError> {
    public_key
        .verify(seed, &proof.0)
        .map_err(|_| LotteryError::InvalidProof)?;

    if Hash256(sha256d(&proof.0)) != *output {
        return Err(LotteryError::InvalidProof);
    }
    Ok(())
}
