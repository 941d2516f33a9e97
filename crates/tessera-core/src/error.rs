//! Error types for the Tessera protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")] UnexpectedEnd,
    #[error("decoded size too large: {size}")] SizeTooLarge { size: u64 },
    #[error("trailing bytes after decode: {remaining}")] TrailingBytes { remaining: usize },
    #[error("invalid value for {0}")] InvalidValue(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script too large: {size} > {max}")] ScriptTooLarge { size: usize, max: usize },
    #[error("unknown or unsupported opcode: {0:#04x}")] BadOpcode(u8),
    #[error("truncated push")] TruncatedPush,
    #[error("push element too large: {size}")] PushTooLarge { size: usize },
    #[error("stack underflow")] StackUnderflow,
    #[error("stack size limit exceeded")] StackOverflow,
    #[error("operation count limit exceeded")] OpCountExceeded,
    #[error("script number out of range")] NumberOverflow,
    #[error("OP_VERIFY failed")] VerifyFailed,
    #[error("OP_RETURN encountered")] EarlyReturn,
    #[error("invalid signature encoding")] BadSignatureEncoding,
    #[error("invalid public key count")] PubkeyCount,
    #[error("invalid signature count")] SigCount,
    #[error("sighash input index out of range")] SighashSingleBug,
    #[error("script evaluated to false")] EvalFalse,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58")] InvalidBase58,
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid version byte: {0:#04x}")] InvalidVersion(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("output {index} value out of money range")] ValueOutOfRange { index: usize },
    #[error("value overflow")] ValueOverflow,
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("null outpoint in non-coinbase input {0}")] NullOutpointInRegularTx(usize),
    #[error("oversized transaction: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("immature coinbase spent by input {index}")] ImmatureCoinbase { index: usize },
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: i64, need: i64 },
    #[error("script failure on input {index}: {source}")] Script { index: usize, source: ScriptError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("no coinbase")] NoCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("duplicate input outpoint in block: {0}")] DoubleSpend(String),
    #[error("invalid merkle root")] InvalidMerkleRoot,
    #[error("oversized block: {size} > {max}")] OversizedBlock { size: usize, max: usize },
    #[error("timestamp too far in the future: +{0}s")] TimestampTooFar(i64),
    #[error("timestamp not after median time past")] TimestampNotAfterMedian,
    #[error("invalid proof of work")] InvalidPow,
    #[error("extends an invalid block")] InvalidAncestor,
    #[error("coinbase claims too much: got {got}, max {max}")] InvalidReward { got: i64, max: i64 },
    #[error("tx error at index {index}: {source}")] Transaction { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already known: {0}")] AlreadyKnown(String),
    #[error("coinbase may not be submitted to the pool")] CoinbaseSubmission,
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")]
    Conflict { existing_txid: String, outpoint: String },
    #[error("fee too low: {fee} < required {required}")] FeeTooLow { fee: i64, required: i64 },
    #[error("pool full")] PoolFull,
    #[error(transparent)] Transaction(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LotteryError {
    #[error("malformed stake proof: {0}")] BadStakeProof(String),
    #[error("producer is not a registered participant")] UnknownParticipant,
    #[error("producer not eligible: {0}")] NotEligible(String),
    #[error("VRF proof does not verify")] InvalidProof,
    #[error("VRF output does not meet the lottery target")] LotteryLoss,
    #[error("producer signature over the block is invalid")] InvalidBlockSignature,
    #[error("block timestamp outside the allowed window")] TimestampOutOfWindow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("undo data missing for block: {0}")] UndoDataMissing(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("missing UTXO during connect: {0}")] MissingUtxo(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("invalid magic bytes")] InvalidMagic,
    #[error("checksum mismatch")] ChecksumMismatch,
    #[error("unknown command: {0}")] UnknownCommand(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("handshake violation: {0}")] HandshakeViolation(String),
    #[error("peer disconnected: {0}")] PeerDisconnected(String),
    #[error("send queue full")] QueueFull,
    #[error("timeout")] Timeout,
    #[error(transparent)] Codec(#[from] CodecError),
    #[error("io: {0}")] Io(String),
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Io(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Script(#[from] ScriptError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Lottery(#[from] LotteryError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error("storage: {0}")] Storage(String),
}
