//! Block locators: compact descriptions of a node's chain for ancestry
//! negotiation.
//!
//! A locator lists block hashes walking back from the tip, step 1 for the
//! first ten entries, then doubling, always ending at genesis. The serving
//! peer scans for the first hash it knows on its main chain and answers
//! with blocks or headers from there.

use tessera_core::constants::MAX_LOCATOR_SIZE;
use tessera_core::types::Hash256;

/// Build a locator for a chain of `tip_height` using `hash_at` to resolve
/// main-chain hashes by height.
pub fn build_locator(
    tip_height: u64,
    hash_at: impl Fn(u64) -> Option<Hash256>,
) -> Vec<Hash256> {
    let mut have = Vec::new();
    let mut step = 1u64;
    let mut height = tip_height;

    loop {
        if let Some(hash) = hash_at(height) {
            have.push(hash);
        }
        if height == 0 || have.len() >= MAX_LOCATOR_SIZE {
            break;
        }
        if have.len() >= 10 {
            step = step.saturating_mul(2);
        }
        height = height.saturating_sub(step);
    }

    // Genesis anchors every locator.
    if let Some(genesis) = hash_at(0) {
        if have.last() != Some(&genesis) && have.len() < MAX_LOCATOR_SIZE {
            have.push(genesis);
        }
    }
    have
}

/// Height of the first locator hash found on the local main chain, using
/// `height_of` to resolve known main-chain hashes. Falls back to genesis.
pub fn find_fork_height(
    locator: &[Hash256],
    height_of: impl Fn(&Hash256) -> Option<u64>,
) -> u64 {
    locator.iter().find_map(|hash| height_of(hash)).unwrap_or(0)
}
