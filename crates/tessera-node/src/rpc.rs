//! JSON-RPC server for the Tessera full node.
//!
//! Exposes the read/write verbs over jsonrpsee. All JSON view types live
//! here; consensus types never serialize through serde.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use tessera_core::codec::{Decodable, Encodable};
use tessera_core::error::MempoolError;
use tessera_core::mempool::Accepted;
use tessera_core::types::{Hash256, Transaction};

use crate::node::Node;

/// Fixed RPC error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcErrorCode {
    InvalidParams = -1,
    NotFound = -2,
    VerifyFailed = -3,
    OutOfMemory = -4,
    Internal = -5,
}

fn rpc_error(code: RpcErrorCode, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code as i32, message.into(), None::<()>)
}

fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| rpc_error(RpcErrorCode::InvalidParams, "invalid hex"))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| rpc_error(RpcErrorCode::InvalidParams, "hash must be 32 bytes"))?;
    Ok(Hash256(array))
}

/// JSON representation of a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockJson {
    pub hash: String,
    pub height: Option<u64>,
    pub version: u32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub tx_count: usize,
    pub tx: Vec<String>,
}

/// JSON representation of mempool aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolInfoJson {
    pub size: usize,
    pub bytes: usize,
    pub total_fee: i64,
}

/// JSON representation of lottery participation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipationInfoJson {
    pub participants: u64,
    pub eligible: u64,
    pub total_staked: i64,
    pub expected_block_time_secs: Option<u64>,
    pub connections: usize,
}

#[rpc(server)]
pub trait TesseraRpc {
    #[method(name = "getbestblockhash")]
    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getblockcount")]
    async fn get_block_count(&self) -> Result<u64, ErrorObjectOwned>;

    #[method(name = "getblock")]
    async fn get_block(&self, hash: String) -> Result<BlockJson, ErrorObjectOwned>;

    #[method(name = "getblockhash")]
    async fn get_block_hash(&self, height: u64) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getrawtransaction")]
    async fn get_raw_transaction(&self, txid: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "sendrawtransaction")]
    async fn send_raw_transaction(&self, hex_tx: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getmempoolinfo")]
    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned>;

    #[method(name = "getparticipationinfo")]
    async fn get_participation_info(&self) -> Result<ParticipationInfoJson, ErrorObjectOwned>;
}

/// RPC handler over a running node.
pub struct RpcImpl {
    node: Arc<Node>,
}

impl RpcImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl TesseraRpcServer for RpcImpl {
    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned> {
        Ok(self.node.best_block_hash().to_string())
    }

    async fn get_block_count(&self) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.block_count())
    }

    async fn get_block(&self, hash: String) -> Result<BlockJson, ErrorObjectOwned> {
        let hash = parse_hash(&hash)?;
        let block = self
            .node
            .get_block(&hash)
            .ok_or_else(|| rpc_error(RpcErrorCode::NotFound, "block not found"))?;

        Ok(BlockJson {
            hash: hash.to_string(),
            height: self.node.main_chain_height_of(&hash),
            version: block.header.version,
            prev_hash: block.header.prev_hash.to_string(),
            merkle_root: block.header.merkle_root.to_string(),
            time: block.header.time,
            bits: block.header.bits,
            nonce: block.header.nonce,
            tx_count: block.transactions.len(),
            tx: block.transactions.iter().map(|tx| tx.txid().to_string()).collect(),
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ErrorObjectOwned> {
        self.node
            .get_block_hash(height)
            .map(|hash| hash.to_string())
            .ok_or_else(|| rpc_error(RpcErrorCode::NotFound, "height beyond tip"))
    }

    async fn get_raw_transaction(&self, txid: String) -> Result<String, ErrorObjectOwned> {
        let txid = parse_hash(&txid)?;
        let (tx, _) = self
            .node
            .get_transaction(&txid)
            .ok_or_else(|| rpc_error(RpcErrorCode::NotFound, "transaction not found"))?;
        Ok(hex::encode(tx.encode()))
    }

    async fn send_raw_transaction(&self, hex_tx: String) -> Result<String, ErrorObjectOwned> {
        let bytes = hex::decode(&hex_tx)
            .map_err(|_| rpc_error(RpcErrorCode::InvalidParams, "invalid hex"))?;
        let tx = Transaction::decode(&bytes)
            .map_err(|e| rpc_error(RpcErrorCode::InvalidParams, e.to_string()))?;
        let txid = tx.txid();

        match self.node.submit_transaction(tx) {
            Ok(Accepted::Pool(txid)) | Ok(Accepted::Orphan(txid)) => Ok(txid.to_string()),
            Err(MempoolError::PoolFull) => {
                Err(rpc_error(RpcErrorCode::OutOfMemory, "mempool full"))
            }
            Err(e) => Err(rpc_error(
                RpcErrorCode::VerifyFailed,
                format!("{txid}: {e}"),
            )),
        }
    }

    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned> {
        let (size, bytes, total_fee) = self.node.mempool_info();
        Ok(MempoolInfoJson { size, bytes, total_fee })
    }

    async fn get_participation_info(&self) -> Result<ParticipationInfoJson, ErrorObjectOwned> {
        let info = self.node.participation_info();
        Ok(ParticipationInfoJson {
            participants: info.participants,
            eligible: info.eligible,
            total_staked: info.total_staked,
            expected_block_time_secs: info.expected_block_time_secs,
            connections: info.peer_count,
        })
    }
}

/// Start the RPC server and return its handle.
pub async fn start_rpc(node: Arc<Node>, addr: &str) -> Result<ServerHandle, std::io::Error> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(std::io::Error::other)?;
    let handle = server.start(RpcImpl::new(node).into_rpc());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(RpcErrorCode::InvalidParams as i32, -1);
        assert_eq!(RpcErrorCode::NotFound as i32, -2);
        assert_eq!(RpcErrorCode::VerifyFailed as i32, -3);
        assert_eq!(RpcErrorCode::OutOfMemory as i32, -4);
        assert_eq!(RpcErrorCode::Internal as i32, -5);
    }

    #[test]
    fn hash_parsing() {
        let hash = Hash256([0xAB; 32]);
        assert_eq!(parse_hash(&hash.to_string()).unwrap(), hash);
        assert!(parse_hash("zz").is_err());
        assert!(parse_hash("abcd").is_err());
    }
}
