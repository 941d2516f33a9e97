//! Stake proofs: how a produced block proves its right to exist.
//!
//! The coinbase `script_sig` of a post-activation block carries a
//! [`StakeProof`] in a stable encoding:
//! `varbytes(public_key) || vrf_output(32) || varbytes(vrf_proof) ||
//! varbytes(signature)`.
//!
//! The producer signature covers the **unsigned block hash**: the header
//! hash recomputed with the proof's signature field emptied (and the merkle
//! root rebuilt accordingly). Signing the literal block hash would be
//! circular, since the signature lives inside a transaction the merkle root
//! commits to; the unsigned form breaks the cycle while still committing to
//! every other byte of the block.

use tessera_core::codec::{Decodable, Encodable, Reader, write_var_bytes};
use tessera_core::constants::{MAX_FUTURE_BLOCK_TIME, MAX_PAST_BLOCK_TIME};
use tessera_core::crypto::{KeyPair, PublicKey};
use tessera_core::error::{CodecError, LotteryError};
use tessera_core::merkle;
use tessera_core::params::ChainParams;
use tessera_core::types::{Block, Hash256};

use crate::registry::ParticipantRegistry;
use crate::target::{lottery_target, output_wins};
use crate::vrf::{self, VrfProof};

/// The participation proof carried in a produced block's coinbase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeProof {
    /// Producer's Ed25519 public key.
    pub public_key: [u8; 32],
    /// VRF output for this height's seed.
    pub vrf_output: Hash256,
    /// VRF proof authenticating the output.
    pub vrf_proof: VrfProof,
    /// Producer signature over the unsigned block hash. Empty while the
    /// block is being sealed.
    pub signature: Vec<u8>,
}

impl Encodable for StakeProof {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_var_bytes(&self.public_key, out);
        self.vrf_output.encode_into(out);
        write_var_bytes(&self.vrf_proof.0, out);
        write_var_bytes(&self.signature, out);
    }
}

impl Decodable for StakeProof {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let pk_bytes = r.read_var_bytes()?;
        let public_key: [u8; 32] =
            pk_bytes.as_slice().try_into().map_err(|_| CodecError::InvalidValue("public_key"))?;
        let vrf_output = Hash256::decode_from(r)?;
        let proof_bytes = r.read_var_bytes()?;
        let vrf_proof = VrfProof::from_slice(&proof_bytes)
            .ok_or(CodecError::InvalidValue("vrf_proof"))?;
        let signature = r.read_var_bytes()?;
        Ok(Self { public_key, vrf_output, vrf_proof, signature })
    }
}

/// Parse the stake proof out of a block's coinbase.
pub fn stake_proof_of(block: &Block) -> Result<StakeProof, LotteryError> {
    let coinbase = block
        .coinbase()
        .ok_or_else(|| LotteryError::BadStakeProof("missing coinbase".into()))?;
    StakeProof::decode(&coinbase.inputs[0].script_sig)
        .map_err(|e| LotteryError::BadStakeProof(e.to_string()))
}

/// The hash the producer signs: this block with the proof signature emptied.
///
/// Verifiers reconstruct it from the block alone, so the signature commits
/// to the entire block except itself.
pub fn unsigned_block_hash(block: &Block) -> Result<Hash256, LotteryError> {
    let mut proof = stake_proof_of(block)?;
    proof.signature = Vec::new();

    let mut unsigned = block.clone();
    unsigned.transactions[0].inputs[0].script_sig = proof.encode();

    let txids: Vec<Hash256> = unsigned.transactions.iter().map(|tx| tx.txid()).collect();
    unsigned.header.merkle_root = merkle::merkle_root(&txids);
    Ok(unsigned.header.hash())
}

/// Seal a block template: install the stake proof in the coinbase, rebuild
/// the merkle root, and sign the unsigned block hash with the producer key.
///
/// The template's coinbase must already pay the producer; only its
/// `script_sig` and the header merkle root are rewritten here.
pub fn seal_block(
    template: &mut Block,
    keypair: &KeyPair,
    vrf_output: Hash256,
    vrf_proof: VrfProof,
) -> Result<(), LotteryError> {
    if template.transactions.is_empty() {
        return Err(LotteryError::BadStakeProof("template has no coinbase".into()));
    }

    // Install the unsigned proof and compute the commitment to sign.
    let unsigned = StakeProof {
        public_key: keypair.public_key().to_bytes(),
        vrf_output,
        vrf_proof,
        signature: Vec::new(),
    };
    template.transactions[0].inputs[0].script_sig = unsigned.encode();
    rebuild_merkle(template);
    let commitment = template.header.hash();

    // Replace with the signed proof and rebuild the commitment structures.
    let signed = StakeProof {
        signature: keypair.sign(commitment.as_bytes()).to_vec(),
        ..unsigned
    };
    template.transactions[0].inputs[0].script_sig = signed.encode();
    rebuild_merkle(template);
    Ok(())
}

fn rebuild_merkle(block: &mut Block) {
    let txids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.txid()).collect();
    block.header.merkle_root = merkle::merkle_root(&txids);
}

/// Verify a post-activation block's participation proof.
///
/// Checks, in order: proof well-formedness, producer registration and
/// eligibility at `height`, VRF validity over the height's seed, the
/// winning condition against the live eligible count, the producer
/// signature over the unsigned block hash, and the timestamp window
/// `[parent_time - 24h, now + 2h]`.
pub fn verify_participation_proof(
    block: &Block,
    height: u64,
    parent_time: u32,
    now: u64,
    registry: &ParticipantRegistry,
    params: &ChainParams,
) -> Result<(), LotteryError> {
    let proof = stake_proof_of(block)?;

    let record = registry
        .get(&proof.public_key)
        .ok_or(LotteryError::UnknownParticipant)?;
    if !record.is_eligible(height, params) {
        return Err(LotteryError::NotEligible(format!(
            "stake {} at height {}",
            record.stake_amount, record.stake_height
        )));
    }

    let public_key = PublicKey::from_bytes(&proof.public_key)
        .map_err(|_| LotteryError::BadStakeProof("invalid public key".into()))?;

    let seed = vrf::lottery_seed(&block.header.prev_hash, height);
    vrf::verify(&public_key, &seed, &proof.vrf_output, &proof.vrf_proof)?;

    let eligible = registry.eligible_count(height, params);
    let target = lottery_target(eligible, params.expected_winners);
    if !output_wins(&proof.vrf_output, &target) {
        return Err(LotteryError::LotteryLoss);
    }

    let commitment = unsigned_block_hash(block)?;
    public_key
        .verify_slice(commitment.as_bytes(), &proof.signature)
        .map_err(|_| LotteryError::InvalidBlockSignature)?;

    let time = u64::from(block.header.time);
    if time + MAX_PAST_BLOCK_TIME < u64::from(parent_time) || time > now + MAX_FUTURE_BLOCK_TIME {
        return Err(LotteryError::TimestampOutOfWindow);
    }

    Ok(())
}
