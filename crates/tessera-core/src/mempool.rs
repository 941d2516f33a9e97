//! In-memory pool of unconfirmed transactions with the hybrid fee economy.
//!
//! Admission computes a **priority score**
//! `P = sum(input_value * confirmations) / size_bytes`; transactions at or
//! above [`FREE_PRIORITY_THRESHOLD`] are admitted free-eligible regardless of
//! fee, everything else must pay the per-kilobyte relay floor unless pool
//! utilization is low. Transactions whose inputs are not yet known are held
//! in a bounded orphan pool keyed by the missing outpoint and promoted when
//! the parent arrives.
//!
//! Block templates are packed in two zones: the first
//! [`FREE_ZONE_PERCENT`] percent of the byte budget takes free-eligible
//! entries in descending priority; the remainder is fee-per-byte ordered.
//! Both zones tie-break by earlier admission and keep topological order.

use std::collections::{BTreeSet, HashMap};

use crate::constants::{
    FREE_PRIORITY_THRESHOLD, FREE_ZONE_PERCENT, MIN_RELAY_FEE_PER_KB, ORPHAN_TTL_SECS,
};
use crate::error::MempoolError;
use crate::types::{Amount, Hash256, OutPoint, Transaction, UtxoEntry};
use crate::validation;

/// Default maximum total serialized bytes in the pool (5 MiB).
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Default maximum number of orphan transactions held.
pub const DEFAULT_MAX_ORPHANS: usize = 100;

/// Fee rate precision: rates are stored in milli-tesserae per byte.
const FEE_RATE_PRECISION: u128 = 1_000;

fn compute_fee_rate(fee: Amount, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = (fee.max(0) as u128) * FEE_RATE_PRECISION / (size as u128);
    rate.min(u64::MAX as u128) as u64
}

/// A transaction stored in the pool with precomputed metadata.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Fee paid (`inputs - outputs`).
    pub fee: Amount,
    /// Serialized size in bytes.
    pub size: usize,
    /// Priority score at admission time.
    pub priority: u128,
    /// Whether the priority score clears the free threshold.
    pub free_eligible: bool,
    /// Admission sequence number; lower means admitted earlier.
    admitted: u64,
    /// Fee rate in milli-tesserae per byte.
    fee_rate: u64,
}

impl MempoolEntry {
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    pub fn admitted_seq(&self) -> u64 {
        self.admitted
    }
}

/// Outcome of a successful [`Mempool::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// Admitted to the pool.
    Pool(Hash256),
    /// Held in the orphan pool until its missing parents arrive.
    Orphan(Hash256),
}

#[derive(Debug, Clone)]
struct OrphanEntry {
    tx: Transaction,
    added_at: u64,
}

/// A block template produced by [`Mempool::build_template`].
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// Selected transactions: free zone first, then the fee zone, each in
    /// selection order (parents before children).
    pub transactions: Vec<Transaction>,
    /// Total fees of the selected transactions.
    pub total_fees: Amount,
    /// Bytes used by the free zone.
    pub free_bytes: usize,
    /// Bytes used by the fee zone.
    pub paid_bytes: usize,
}

/// In-memory pool of unconfirmed transactions.
///
/// Not thread-safe; the node wraps it in its own lock.
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint → txid of the pool transaction that spends it.
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// Eviction index: ascending `(fee_rate, txid)`.
    by_fee_rate: BTreeSet<(u64, Hash256)>,
    /// Orphans by their own txid.
    orphans: HashMap<Hash256, OrphanEntry>,
    /// Missing prevout → orphan txids waiting on it.
    orphans_by_missing: HashMap<OutPoint, Vec<Hash256>>,
    max_bytes: usize,
    max_orphans: usize,
    total_bytes: usize,
    next_seq: u64,
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl Mempool {
    pub fn new(max_bytes: usize, max_orphans: usize) -> Self {
        Self::with_clock(max_bytes, max_orphans, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_BYTES, DEFAULT_MAX_ORPHANS)
    }

    /// Create a pool with an injected clock, for deterministic tests.
    pub fn with_clock(
        max_bytes: usize,
        max_orphans: usize,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            by_fee_rate: BTreeSet::new(),
            orphans: HashMap::new(),
            orphans_by_missing: HashMap::new(),
            max_bytes,
            max_orphans,
            total_bytes: 0,
            next_seq: 0,
            clock: Box::new(clock),
        }
    }

    /// Submit a transaction for admission.
    ///
    /// `get_utxo` is the confirmed-chain view at the current best tip;
    /// unconfirmed parent outputs inside the pool are resolved automatically.
    /// `best_height` is the current tip height.
    ///
    /// Returns [`Accepted::Orphan`] when inputs are missing from both the
    /// chain and the pool. Promotion of waiting orphans happens automatically
    /// when their parents are admitted.
    pub fn accept<F>(
        &mut self,
        tx: Transaction,
        get_utxo: F,
        best_height: u64,
    ) -> Result<Accepted, MempoolError>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        let txid = tx.txid();
        let accepted = self.accept_one(tx, txid, &get_utxo, best_height)?;

        if matches!(accepted, Accepted::Pool(_)) {
            self.promote_orphans(txid, &get_utxo, best_height);
        }
        Ok(accepted)
    }

    /// Admission for a single transaction; no orphan promotion.
    fn accept_one<F>(
        &mut self,
        tx: Transaction,
        txid: Hash256,
        get_utxo: &F,
        best_height: u64,
    ) -> Result<Accepted, MempoolError>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        if self.entries.contains_key(&txid) || self.orphans.contains_key(&txid) {
            return Err(MempoolError::AlreadyKnown(txid.to_string()));
        }

        validation::validate_transaction_structure(&tx)?;

        if tx.is_coinbase() {
            return Err(MempoolError::CoinbaseSubmission);
        }

        // Conflicts: an outpoint already consumed by a pool transaction.
        for input in &tx.inputs {
            if let Some(existing) = self.by_outpoint.get(&input.prevout) {
                return Err(MempoolError::Conflict {
                    existing_txid: existing.to_string(),
                    outpoint: input.prevout.to_string(),
                });
            }
        }

        // Resolve inputs from chain ∪ pool; any gap makes this an orphan.
        let spend_height = best_height + 1;
        let mut missing = Vec::new();
        for input in &tx.inputs {
            if self.resolve_utxo(&input.prevout, get_utxo, spend_height).is_none() {
                missing.push(input.prevout);
            }
        }
        if !missing.is_empty() {
            self.insert_orphan(txid, tx, missing);
            return Ok(Accepted::Orphan(txid));
        }

        // Full contextual validation (scripts, maturity, conservation).
        let resolve = |op: &OutPoint| self.resolve_utxo(op, get_utxo, spend_height);
        let validated = validation::validate_transaction(&tx, resolve, spend_height)?;

        let size = tx.size();
        let priority = self.priority_score(&tx, get_utxo, spend_height, size);
        let free_eligible = priority >= FREE_PRIORITY_THRESHOLD;

        // Fee floor for non-free transactions, waived under low pressure.
        if !free_eligible {
            let required = MIN_RELAY_FEE_PER_KB * (((size as i64) + 1023) / 1024);
            if validated.fee < required && !self.low_pressure() {
                return Err(MempoolError::FeeTooLow { fee: validated.fee, required });
            }
        }

        let fee_rate = compute_fee_rate(validated.fee, size);
        let admitted = self.next_seq;
        self.next_seq += 1;

        for input in &tx.inputs {
            self.by_outpoint.insert(input.prevout, txid);
        }
        self.by_fee_rate.insert((fee_rate, txid));
        self.total_bytes += size;
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee: validated.fee,
                size,
                priority,
                free_eligible,
                admitted,
                fee_rate,
            },
        );

        // Size-triggered eviction, lowest fee rate first. The new entry
        // itself may be the victim.
        let evicted = self.enforce_size_limit();
        if evicted.contains(&txid) {
            return Err(MempoolError::PoolFull);
        }

        Ok(Accepted::Pool(txid))
    }

    /// Look up an outpoint in the confirmed view or among pool outputs.
    ///
    /// Pool outputs count as created at the spend height, so they contribute
    /// zero confirmations to priority and are never coinbase.
    fn resolve_utxo<F>(&self, op: &OutPoint, get_utxo: &F, spend_height: u64) -> Option<UtxoEntry>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        if let Some(entry) = get_utxo(op) {
            return Some(entry);
        }
        let parent = self.entries.get(&op.txid)?;
        let output = parent.tx.outputs.get(op.index as usize)?;
        Some(UtxoEntry { output: output.clone(), height: spend_height, is_coinbase: false })
    }

    /// `P = sum(value_i * confirmations_i) / size_bytes`.
    fn priority_score<F>(&self, tx: &Transaction, get_utxo: &F, spend_height: u64, size: usize) -> u128
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        if size == 0 {
            return 0;
        }
        let mut weighted: u128 = 0;
        for input in &tx.inputs {
            if let Some(utxo) = get_utxo(&input.prevout) {
                let confirmations = spend_height.saturating_sub(utxo.height) as u128;
                weighted += (utxo.output.value.max(0) as u128) * confirmations;
            }
            // Pool parents: zero confirmations, zero contribution.
        }
        weighted / size as u128
    }

    /// Below 10% utilization the relay fee floor is waived.
    fn low_pressure(&self) -> bool {
        self.total_bytes * 10 < self.max_bytes
    }

    fn insert_orphan(&mut self, txid: Hash256, tx: Transaction, missing: Vec<OutPoint>) {
        // Bounded pool: evict the oldest orphan to make room.
        if self.orphans.len() >= self.max_orphans {
            if let Some(oldest) = self
                .orphans
                .iter()
                .min_by_key(|(_, o)| o.added_at)
                .map(|(id, _)| *id)
            {
                self.remove_orphan(&oldest);
            }
        }
        for op in missing {
            self.orphans_by_missing.entry(op).or_default().push(txid);
        }
        self.orphans.insert(txid, OrphanEntry { tx, added_at: (self.clock)() });
    }

    fn remove_orphan(&mut self, txid: &Hash256) -> Option<Transaction> {
        let entry = self.orphans.remove(txid)?;
        self.orphans_by_missing.retain(|_, waiting| {
            waiting.retain(|id| id != txid);
            !waiting.is_empty()
        });
        Some(entry.tx)
    }

    /// Retry orphans whose missing parent just became available.
    fn promote_orphans<F>(&mut self, parent_txid: Hash256, get_utxo: &F, best_height: u64)
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        let mut parents = vec![parent_txid];

        while let Some(parent) = parents.pop() {
            let newly_ready: Vec<Hash256> = self
                .orphans_by_missing
                .iter()
                .filter(|(op, _)| op.txid == parent)
                .flat_map(|(_, waiting)| waiting.iter().copied())
                .collect();

            for txid in newly_ready {
                if let Some(tx) = self.remove_orphan(&txid) {
                    match self.accept_one(tx, txid, get_utxo, best_height) {
                        // A promoted orphan may itself unblock children.
                        Ok(Accepted::Pool(_)) => parents.push(txid),
                        // Still missing other parents, re-orphaned inside
                        // accept_one; invalid orphans are simply dropped.
                        Ok(Accepted::Orphan(_)) | Err(_) => {}
                    }
                }
            }
        }
    }

    /// Evict orphans older than [`ORPHAN_TTL_SECS`].
    pub fn expire_orphans(&mut self) {
        let now = (self.clock)();
        let expired: Vec<Hash256> = self
            .orphans
            .iter()
            .filter(|(_, o)| now.saturating_sub(o.added_at) > ORPHAN_TTL_SECS)
            .map(|(id, _)| *id)
            .collect();
        for txid in expired {
            self.remove_orphan(&txid);
        }
    }

    /// Evict lowest-fee-rate entries until the pool fits its byte budget.
    fn enforce_size_limit(&mut self) -> Vec<Hash256> {
        let mut evicted = Vec::new();
        while self.total_bytes > self.max_bytes {
            let Some(&(_, victim)) = self.by_fee_rate.iter().next() else {
                break;
            };
            self.remove_entry(victim);
            evicted.push(victim);
        }
        evicted
    }

    /// Remove a transaction from the pool by txid.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.remove_entry(*txid)
    }

    fn remove_entry(&mut self, txid: Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(&txid)?;
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.prevout);
        }
        self.by_fee_rate.remove(&(entry.fee_rate, txid));
        self.total_bytes -= entry.size;
        Some(entry)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Whether any of a transaction's inputs conflict with pool entries.
    pub fn has_conflict(&self, tx: &Transaction) -> bool {
        tx.inputs.iter().any(|input| self.by_outpoint.contains_key(&input.prevout))
    }

    /// Remove transactions confirmed in a block and any pool transactions
    /// that now conflict with the block's spends.
    pub fn remove_confirmed_block(&mut self, block: &crate::types::Block) {
        for tx in &block.transactions {
            self.remove_entry(tx.txid());
            for input in &tx.inputs {
                if input.prevout.is_null() {
                    continue;
                }
                if let Some(conflicting) = self.by_outpoint.get(&input.prevout).copied() {
                    self.remove_entry(conflicting);
                }
            }
        }
    }

    /// Build a block template within `max_bytes` of transaction data.
    ///
    /// Free zone: the first `FREE_ZONE_PERCENT`% of the budget, packed with
    /// free-eligible entries in descending priority (earlier admission wins
    /// ties). Fee zone: remaining capacity in descending fee-per-byte. In
    /// both zones an entry whose in-pool parent was not already selected is
    /// skipped, which keeps the final list topologically ordered.
    pub fn build_template(&self, max_bytes: usize) -> BlockTemplate {
        let free_budget = max_bytes * FREE_ZONE_PERCENT / 100;
        let mut selected: Vec<&MempoolEntry> = Vec::new();
        let mut selected_ids: std::collections::HashSet<Hash256> = std::collections::HashSet::new();

        // --- free zone ---
        let mut free_candidates: Vec<&MempoolEntry> =
            self.entries.values().filter(|e| e.free_eligible).collect();
        free_candidates.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(a.admitted.cmp(&b.admitted))
        });

        let mut free_bytes = 0usize;
        for entry in free_candidates {
            if free_bytes + entry.size > free_budget {
                continue;
            }
            if !self.parents_selected(entry, &selected_ids) {
                continue;
            }
            free_bytes += entry.size;
            selected_ids.insert(entry.txid);
            selected.push(entry);
        }

        // --- fee zone ---
        let mut paid_candidates: Vec<&MempoolEntry> = self
            .entries
            .values()
            .filter(|e| !selected_ids.contains(&e.txid))
            .collect();
        paid_candidates.sort_by(|a, b| {
            b.fee_rate.cmp(&a.fee_rate).then(a.admitted.cmp(&b.admitted))
        });

        let paid_budget = max_bytes.saturating_sub(free_bytes);
        let mut paid_bytes = 0usize;
        for entry in paid_candidates {
            if paid_bytes + entry.size > paid_budget {
                continue;
            }
            if !self.parents_selected(entry, &selected_ids) {
                continue;
            }
            paid_bytes += entry.size;
            selected_ids.insert(entry.txid);
            selected.push(entry);
        }

        BlockTemplate {
            total_fees: selected.iter().map(|e| e.fee).sum(),
            transactions: selected.iter().map(|e| e.tx.clone()).collect(),
            free_bytes,
            paid_bytes,
        }
    }

    /// All in-pool parents of `entry` already selected?
    fn parents_selected(
        &self,
        entry: &MempoolEntry,
        selected: &std::collections::HashSet<Hash256>,
    ) -> bool {
        entry.tx.inputs.iter().all(|input| {
            let parent = input.prevout.txid;
            !self.entries.contains_key(&parent) || selected.contains(&parent)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn total_fees(&self) -> Amount {
        self.entries.values().map(|e| e.fee).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }
}
