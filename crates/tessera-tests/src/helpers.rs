//! Builders for chains, blocks, and signed transactions used across the
//! end-to-end scenarios.

use tessera_consensus::ChainManager;
use tessera_core::chain_state::MemoryChainStore;
use tessera_core::crypto::KeyPair;
use tessera_core::genesis;
use tessera_core::params::ChainParams;
use tessera_core::script::{p2pkh_script, p2pkh_script_sig};
use tessera_core::sighash::{SIGHASH_ALL, signature_hash};
use tessera_core::types::{
    Amount, Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};
use tessera_lottery::proof::seal_block;
use tessera_lottery::registry::ParticipantRecord;
use tessera_lottery::vrf;

/// Anyone-can-spend lock (a bare OP_1) for outputs tests don't sign for.
pub const OPEN_LOCK: [u8; 1] = [0x51];

/// Fixed wall clock for deterministic chain tests: comfortably after the
/// genesis timestamp, ahead of every block time the tests mint.
pub const NOW: u64 = genesis::GENESIS_TIME as u64 + 1_000_000;

/// The staking key every test chain's sole producer uses.
pub fn staker() -> KeyPair {
    KeyPair::from_secret_bytes([0x11; 32])
}

/// A deterministic key derived from a single-byte seed.
pub fn key(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes([seed; 32])
}

/// A fresh regtest chain over an in-memory store, with `genesis` connected
/// and the [`staker`] bootstrapped as an always-eligible participant.
pub fn new_chain(genesis: Block) -> ChainManager {
    let params = ChainParams::regtest();
    let mut chain = ChainManager::with_clock(
        params.clone(),
        Box::new(MemoryChainStore::new()),
        genesis,
        || NOW,
    )
    .unwrap();

    let kp = staker();
    chain.bootstrap_participant(
        ParticipantRecord {
            address: kp.address(),
            stake_amount: params.min_stake,
            stake_height: 0,
            public_key: kp.public_key().to_bytes(),
        },
        OutPoint::new(Hash256([0xEE; 32]), 0),
    );
    chain
}

/// A genesis block whose single coinbase output pays `value` to `lock`.
pub fn genesis_paying(value: Amount, lock: Vec<u8>) -> Block {
    genesis::genesis_block_paying(
        &ChainParams::regtest(),
        vec![TxOutput { value, script_pubkey: lock }],
    )
}

/// Build and seal a block on an arbitrary parent with the [`staker`] key.
///
/// `burn` is subtracted from the coinbase claim (underclaiming is legal) so
/// sibling blocks at the same height stay distinct.
pub fn make_block_on(
    chain: &ChainManager,
    parent_hash: Hash256,
    parent_time: u32,
    height: u64,
    txs: Vec<Transaction>,
    fees: Amount,
    burn: Amount,
) -> Block {
    let kp = staker();
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            prevout: OutPoint::null(),
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            value: chain.params().subsidy(height) + fees - burn,
            script_pubkey: OPEN_LOCK.to_vec(),
        }],
        locktime: height as u32,
    };
    let mut transactions = vec![coinbase];
    transactions.extend(txs);

    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: parent_hash,
            merkle_root: Hash256::ZERO,
            time: parent_time + 60,
            bits: 0,
            nonce: 0,
        },
        transactions,
    };

    let seed = vrf::lottery_seed(&parent_hash, height);
    let (output, proof) = vrf::evaluate(&kp, &seed);
    seal_block(&mut block, &kp, output, proof).unwrap();
    block
}

/// Build and seal the next block on the chain's best tip.
pub fn next_block(chain: &ChainManager, txs: Vec<Transaction>, fees: Amount) -> Block {
    let parent_time = chain.get_header(&chain.best_hash()).unwrap().time;
    make_block_on(
        chain,
        chain.best_hash(),
        parent_time,
        chain.best_height() + 1,
        txs,
        fees,
        0,
    )
}

/// Produce and connect `n` empty blocks.
pub fn grow(chain: &mut ChainManager, n: u64) {
    for _ in 0..n {
        let block = next_block(chain, vec![], 0);
        chain.accept_block(&block).unwrap();
    }
}

/// Build a fully signed P2PKH transaction spending `outpoint` (locked to
/// `owner`) into the given outputs.
pub fn sign_spend(
    owner: &KeyPair,
    outpoint: OutPoint,
    outputs: Vec<(Amount, Vec<u8>)>,
) -> Transaction {
    let lock = p2pkh_script(&owner.address());
    let mut tx = Transaction {
        version: 1,
        inputs: vec![TxInput { prevout: outpoint, script_sig: Vec::new(), sequence: u32::MAX }],
        outputs: outputs
            .into_iter()
            .map(|(value, script_pubkey)| TxOutput { value, script_pubkey })
            .collect(),
        locktime: 0,
    };

    let digest = signature_hash(&tx, 0, &lock, SIGHASH_ALL).unwrap();
    let mut signature = owner.sign(digest.as_bytes()).to_vec();
    signature.push(SIGHASH_ALL);
    tx.inputs[0].script_sig = p2pkh_script_sig(&signature, &owner.public_key().to_bytes());
    tx
}
