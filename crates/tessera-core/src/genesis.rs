//! Genesis block construction.
//!
//! The genesis block is built deterministically from chain parameters: a
//! single coinbase paying the initial subsidy to an unspendable OP_RETURN
//! output. Deployments that allocate genesis stake (or, in tests, spendable
//! outputs) build their own block with [`genesis_block_paying`].

use crate::merkle;
use crate::params::ChainParams;
use crate::script::opcodes::OP_RETURN;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Fixed genesis timestamp (2024-01-01 00:00:00 UTC).
pub const GENESIS_TIME: u32 = 1_704_067_200;

/// Compact target accepting any hash, used for the genesis header.
pub const GENESIS_BITS: u32 = 0x207F_FFFF;

/// The default genesis block for `params`: one unspendable coinbase output.
pub fn genesis_block(params: &ChainParams) -> Block {
    genesis_block_paying(params, vec![TxOutput {
        value: params.initial_subsidy,
        script_pubkey: vec![OP_RETURN],
    }])
}

/// A genesis block whose coinbase carries the given outputs.
pub fn genesis_block_paying(params: &ChainParams, outputs: Vec<TxOutput>) -> Block {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            prevout: OutPoint::null(),
            script_sig: params.magic.to_vec(),
            sequence: u32::MAX,
        }],
        outputs,
        locktime: 0,
    };
    let merkle_root = merkle::merkle_root(&[coinbase.txid()]);

    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            time: GENESIS_TIME,
            bits: GENESIS_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    }
}

/// Hash of the default genesis block for `params`.
pub fn genesis_hash(params: &ChainParams) -> Hash256 {
    genesis_block(params).header.hash()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_validation;

    #[test]
    fn genesis_is_structurally_valid() {
        let block = genesis_block(&ChainParams::mainnet());
        assert!(block_validation::validate_block_structure(&block).is_ok());
    }

    #[test]
    fn genesis_is_deterministic() {
        let params = ChainParams::mainnet();
        assert_eq!(genesis_hash(&params), genesis_hash(&params));
    }

    #[test]
    fn genesis_differs_per_network() {
        assert_ne!(
            genesis_hash(&ChainParams::mainnet()),
            genesis_hash(&ChainParams::regtest())
        );
    }

    #[test]
    fn genesis_coinbase_pays_initial_subsidy() {
        let params = ChainParams::mainnet();
        let block = genesis_block(&params);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(
            block.transactions[0].total_output_value().unwrap(),
            params.initial_subsidy
        );
    }

    #[test]
    fn custom_outputs_change_the_hash() {
        let params = ChainParams::regtest();
        let custom = genesis_block_paying(&params, vec![TxOutput {
            value: 5_000_000_000,
            script_pubkey: vec![0x51],
        }]);
        assert_ne!(custom.header.hash(), genesis_hash(&params));
    }
}
