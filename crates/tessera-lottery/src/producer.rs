//! Slot evaluation for local block production.
//!
//! Every production tick the node asks: with my key, at the next height, on
//! top of the current tip, did I win? [`evaluate_slot`] answers without
//! touching the network or the mempool; the node assembles and seals a block
//! only on [`SlotResult::Won`]. Sealing and submission are separate
//! operations ([`seal_block`](crate::proof::seal_block) and the chain
//! manager's accept path).

use tessera_core::crypto::KeyPair;
use tessera_core::params::ChainParams;
use tessera_core::types::Hash256;
use tracing::trace;

use crate::registry::ParticipantRegistry;
use crate::target::{lottery_target, output_wins};
use crate::vrf::{self, VrfProof};

/// Outcome of one production-slot evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotResult {
    /// The local key holds no eligible stake at this height.
    NotEligible,
    /// Eligible, but the VRF output does not meet the target.
    Lost,
    /// Winner: carry the output and proof into the sealed block.
    Won { output: Hash256, proof: VrfProof },
}

/// Evaluate the lottery for `keypair` producing at `height` on `prev_hash`.
pub fn evaluate_slot(
    keypair: &KeyPair,
    prev_hash: &Hash256,
    height: u64,
    registry: &ParticipantRegistry,
    params: &ChainParams,
) -> SlotResult {
    let public_key = keypair.public_key().to_bytes();
    let eligible = registry
        .get(&public_key)
        .is_some_and(|record| record.is_eligible(height, params));
    if !eligible {
        return SlotResult::NotEligible;
    }

    let seed = vrf::lottery_seed(prev_hash, height);
    let (output, proof) = vrf::evaluate(keypair, &seed);

    let count = registry.eligible_count(height, params);
    let target = lottery_target(count, params.expected_winners);
    if output_wins(&output, &target) {
        trace!(height, %output, "lottery won");
        SlotResult::Won { output, proof }
    } else {
        SlotResult::Lost
    }
}
