//! Block index arena.
//!
//! Every block ever seen gets an entry in a flat arena addressed by integer
//! handle; parent links are handles, never pointers, and the main-chain
//! "next" relationship is derived from heights rather than stored. Entries
//! advance through status flags and are never destroyed.

use std::collections::HashMap;

use tessera_core::constants::MEDIAN_TIME_SPAN;
use tessera_core::types::{BlockHeader, Hash256};

/// Status flag bits for index entries.
pub mod status {
    /// Header passed context checks (time, proof dispatch).
    pub const HEADER_VALID: u8 = 1 << 0;
    /// Full body passed contextual validation at least once.
    pub const BODY_VALID: u8 = 1 << 1;
    /// Currently connected to the UTXO set.
    pub const CONNECTED: u8 = 1 << 2;
    /// On the current main chain.
    pub const MAIN_CHAIN: u8 = 1 << 3;
    /// Permanently rejected; never reconsidered for tip selection.
    pub const INVALID: u8 = 1 << 4;
}

/// One block's entry in the index.
#[derive(Clone, Debug)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub header: BlockHeader,
    /// Arena handle of the parent; `None` only for genesis.
    pub parent: Option<usize>,
    pub height: u64,
    /// Cumulative chain weight up to and including this block.
    pub chain_weight: u128,
    /// Arrival order; the last resort for tie-breaking.
    pub seq: u64,
    /// `(VRF output, producer public key)` from the block's stake proof.
    /// `None` for pre-activation blocks and malformed proofs. Orders
    /// competing same-height winners deterministically.
    pub lottery_rank: Option<(Hash256, [u8; 32])>,
    pub status: u8,
}

impl BlockIndexEntry {
    pub fn has(&self, flag: u8) -> bool {
        self.status & flag != 0
    }
}

/// Flat arena of block index entries with a hash lookup.
pub struct BlockIndexArena {
    entries: Vec<BlockIndexEntry>,
    by_hash: HashMap<Hash256, usize>,
    next_seq: u64,
}

impl BlockIndexArena {
    pub fn new() -> Self {
        Self { entries: Vec::new(), by_hash: HashMap::new(), next_seq: 0 }
    }

    /// Insert a new entry, returning its handle. The caller supplies the
    /// weight this block adds on top of its parent and, for post-activation
    /// blocks, the lottery rank from its stake proof.
    pub fn insert(
        &mut self,
        header: BlockHeader,
        parent: Option<usize>,
        block_weight: u128,
        lottery_rank: Option<(Hash256, [u8; 32])>,
        initial_status: u8,
    ) -> usize {
        let hash = header.hash();
        let (height, parent_weight) = match parent {
            Some(p) => (self.entries[p].height + 1, self.entries[p].chain_weight),
            None => (0, 0),
        };
        let handle = self.entries.len();
        self.entries.push(BlockIndexEntry {
            hash,
            header,
            parent,
            height,
            chain_weight: parent_weight.saturating_add(block_weight),
            seq: self.next_seq,
            lottery_rank,
            status: initial_status,
        });
        self.next_seq += 1;
        self.by_hash.insert(hash, handle);
        handle
    }

    pub fn get(&self, handle: usize) -> &BlockIndexEntry {
        &self.entries[handle]
    }

    pub fn handle_of(&self, hash: &Hash256) -> Option<usize> {
        self.by_hash.get(hash).copied()
    }

    pub fn get_by_hash(&self, hash: &Hash256) -> Option<&BlockIndexEntry> {
        self.handle_of(hash).map(|h| self.get(h))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_flag(&mut self, handle: usize, flag: u8) {
        self.entries[handle].status |= flag;
    }

    pub fn clear_flag(&mut self, handle: usize, flag: u8) {
        self.entries[handle].status &= !flag;
    }

    /// Whether `a` is preferable to `b` as the chain tip.
    ///
    /// Strictly greater weight wins outright. Equal-weight ties between
    /// winners of the same lottery round (same parent, so same seed and
    /// height) resolve by lowest VRF output, then lexicographic producer
    /// key: every node reaches the same verdict no matter which block
    /// arrived first, so competing winners cannot split the honest network.
    /// Arrival order decides only what the rank cannot (pre-activation
    /// ties, deeper forks, or blocks sharing a producer).
    pub fn better_tip(&self, a: usize, b: usize) -> bool {
        let (ea, eb) = (self.get(a), self.get(b));
        if ea.chain_weight != eb.chain_weight {
            return ea.chain_weight > eb.chain_weight;
        }
        if ea.header.prev_hash == eb.header.prev_hash {
            if let (Some(rank_a), Some(rank_b)) = (&ea.lottery_rank, &eb.lottery_rank) {
                if rank_a != rank_b {
                    return rank_a < rank_b;
                }
            }
        }
        ea.seq < eb.seq
    }

    /// Median of the last [`MEDIAN_TIME_SPAN`] header timestamps ending at
    /// `handle` (inclusive of the entry itself).
    pub fn median_time_past(&self, handle: usize) -> u32 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = Some(handle);
        while let Some(h) = cursor {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let entry = self.get(h);
            times.push(entry.header.time);
            cursor = entry.parent;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Walk from `handle` toward genesis, yielding handles.
    pub fn ancestors(&self, handle: usize) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = Some(handle);
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.get(current).parent;
            Some(current)
        })
    }

    /// The ancestor of `handle` at `height`, if the chain reaches back.
    pub fn ancestor_at(&self, handle: usize, height: u64) -> Option<usize> {
        self.ancestors(handle).find(|&h| self.get(h).height == height)
    }
}

impl Default for BlockIndexArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash256 {
        Hash256([byte; 32])
    }

    fn header(time: u32, salt: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256([salt as u8; 32]),
            time,
            bits: salt,
            nonce: 0,
        }
    }

    /// Build a straight chain of `n` entries with the given times.
    fn chain(times: &[u32]) -> (BlockIndexArena, Vec<usize>) {
        let mut arena = BlockIndexArena::new();
        let mut handles = Vec::new();
        let mut parent = None;
        for (i, &t) in times.iter().enumerate() {
            let h = arena.insert(header(t, i as u32), parent, 10, None, status::HEADER_VALID);
            handles.push(h);
            parent = Some(h);
        }
        (arena, handles)
    }

    #[test]
    fn insert_links_heights_and_weight() {
        let (arena, handles) = chain(&[100, 200, 300]);
        assert_eq!(arena.get(handles[0]).height, 0);
        assert_eq!(arena.get(handles[2]).height, 2);
        assert_eq!(arena.get(handles[0]).chain_weight, 10);
        assert_eq!(arena.get(handles[2]).chain_weight, 30);
    }

    #[test]
    fn hash_lookup() {
        let (arena, handles) = chain(&[100, 200]);
        let hash = arena.get(handles[1]).hash;
        assert_eq!(arena.handle_of(&hash), Some(handles[1]));
        assert!(arena.get_by_hash(&Hash256([0xFF; 32])).is_none());
    }

    #[test]
    fn flags_set_and_clear() {
        let (mut arena, handles) = chain(&[100]);
        arena.set_flag(handles[0], status::MAIN_CHAIN);
        assert!(arena.get(handles[0]).has(status::MAIN_CHAIN));
        arena.clear_flag(handles[0], status::MAIN_CHAIN);
        assert!(!arena.get(handles[0]).has(status::MAIN_CHAIN));
        // Other flags survive.
        assert!(arena.get(handles[0]).has(status::HEADER_VALID));
    }

    #[test]
    fn better_tip_prefers_weight_then_arrival() {
        let mut arena = BlockIndexArena::new();
        let a = arena.insert(header(1, 1), None, 10, None, 0);
        let b = arena.insert(header(2, 2), None, 20, None, 0);
        let c = arena.insert(header(3, 3), None, 20, None, 0);
        assert!(arena.better_tip(b, a));
        // Equal weight, no ranks: b arrived before c.
        assert!(arena.better_tip(b, c));
        assert!(!arena.better_tip(c, b));
    }

    #[test]
    fn better_tip_equal_weight_prefers_lowest_vrf_output() {
        let mut arena = BlockIndexArena::new();
        // Same weight and height; `high` arrives first but carries the
        // larger VRF output.
        let high = arena.insert(header(1, 1), None, 20, Some((h(0x90), [5; 32])), 0);
        let low = arena.insert(header(2, 2), None, 20, Some((h(0x10), [9; 32])), 0);
        assert!(arena.better_tip(low, high));
        assert!(!arena.better_tip(high, low));
    }

    #[test]
    fn better_tip_equal_output_prefers_lowest_pubkey() {
        let mut arena = BlockIndexArena::new();
        let second_key = arena.insert(header(1, 1), None, 20, Some((h(0x40), [7; 32])), 0);
        let first_key = arena.insert(header(2, 2), None, 20, Some((h(0x40), [3; 32])), 0);
        assert!(arena.better_tip(first_key, second_key));
        assert!(!arena.better_tip(second_key, first_key));
    }

    #[test]
    fn better_tip_identical_rank_falls_back_to_arrival() {
        let mut arena = BlockIndexArena::new();
        let rank = Some((h(0x40), [7; 32]));
        let earlier = arena.insert(header(1, 1), None, 20, rank, 0);
        let later = arena.insert(header(2, 2), None, 20, rank, 0);
        assert!(arena.better_tip(earlier, later));
        assert!(!arena.better_tip(later, earlier));
    }

    #[test]
    fn better_tip_rank_ignored_for_different_parents() {
        let mut arena = BlockIndexArena::new();
        // Equal weight but the candidates sit on different parents: these
        // are not winners of the same round, so arrival order decides even
        // though the later block carries the better rank.
        let mut on_other_parent = header(2, 2);
        on_other_parent.prev_hash = h(0xAA);
        let first = arena.insert(header(1, 1), None, 20, Some((h(0x90), [5; 32])), 0);
        let second = arena.insert(on_other_parent, None, 20, Some((h(0x10), [1; 32])), 0);
        assert!(arena.better_tip(first, second));
        assert!(!arena.better_tip(second, first));
    }

    #[test]
    fn median_time_short_chain() {
        let (arena, handles) = chain(&[100, 300, 200]);
        // Median of {100, 300, 200} sorted = {100, 200, 300} -> 200.
        assert_eq!(arena.median_time_past(handles[2]), 200);
        // Single entry: its own time.
        assert_eq!(arena.median_time_past(handles[0]), 100);
    }

    #[test]
    fn median_time_window_is_eleven() {
        let times: Vec<u32> = (1..=20).map(|i| i * 100).collect();
        let (arena, handles) = chain(&times);
        // Last 11 times are 1000..=2000 step 100; median is 1500.
        assert_eq!(arena.median_time_past(*handles.last().unwrap()), 1500);
    }

    #[test]
    fn ancestors_walk_to_genesis() {
        let (arena, handles) = chain(&[1, 2, 3, 4]);
        let walked: Vec<usize> = arena.ancestors(handles[3]).collect();
        assert_eq!(walked, vec![handles[3], handles[2], handles[1], handles[0]]);
    }

    #[test]
    fn ancestor_at_height() {
        let (arena, handles) = chain(&[1, 2, 3, 4]);
        assert_eq!(arena.ancestor_at(handles[3], 1), Some(handles[1]));
        assert_eq!(arena.ancestor_at(handles[3], 9), None);
    }
}
