//! Protocol constants. All monetary values in tesserae (1 TSR = 10^8 tesserae).

pub const COIN: i64 = 100_000_000;

/// Upper bound of the money range. Values outside `[0, MAX_MONEY]` are invalid.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Hard cap on any single wire message or decoded size prefix (32 MiB).
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

pub const MAX_BLOCK_SIZE: usize = 1_048_576;
pub const MAX_TX_SIZE: usize = 100_000;

pub const MAX_SCRIPT_SIZE: usize = 10_000;
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
pub const MAX_STACK_SIZE: usize = 1_000;
pub const MAX_OPS_PER_SCRIPT: usize = 201;
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// A coinbase output is spendable once `best_height >= height + COINBASE_MATURITY`.
pub const COINBASE_MATURITY: u64 = 100;

/// Coinbase script_sig budget: height marker plus the stake proof
/// (pubkey, VRF output, VRF proof, producer signature, length prefixes).
pub const MAX_COINBASE_SCRIPT_SIG: usize = 512;

/// Priority score above which a transaction rides in the free zone.
/// Score is `sum(input_value * confirmations) / size_bytes`.
pub const FREE_PRIORITY_THRESHOLD: u128 = 57_600_000;

/// Minimum relay fee per started kilobyte for non-free transactions.
pub const MIN_RELAY_FEE_PER_KB: i64 = 1_000;

/// Fraction of a block template reserved for high-priority free transactions,
/// expressed in percent.
pub const FREE_ZONE_PERCENT: usize = 5;

/// Orphan transactions older than this are evicted from the orphan pool.
pub const ORPHAN_TTL_SECS: u64 = 300;

/// Blocks with timestamps more than this far ahead of wall clock are rejected.
pub const MAX_FUTURE_BLOCK_TIME: u64 = 2 * 60 * 60;

/// A post-activation block may be at most this far behind its parent's time.
pub const MAX_PAST_BLOCK_TIME: u64 = 24 * 60 * 60;

/// Number of headers (inclusive of self) over which median-time-past is taken.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Transaction version that locks stake and registers a lottery participant.
pub const STAKE_TX_VERSION: u32 = 2;

pub const MAGIC_BYTES: [u8; 4] = [0x54, 0x53, 0x52, 0x41]; // "TSRA"
pub const DEFAULT_P2P_PORT: u16 = 19333;
pub const DEFAULT_RPC_PORT: u16 = 19332;

pub const MAX_LOCATOR_SIZE: usize = 64;
pub const MAX_HEADERS_PER_MSG: usize = 2_000;
pub const MAX_INV_PER_MSG: usize = 50_000;
pub const MAX_ADDR_PER_MSG: usize = 1_000;

/// Interval of the local block-production tick, in seconds.
pub const PRODUCTION_TICK_SECS: u64 = 2;

/// Disconnect a peer after this long without any message.
pub const PEER_TIMEOUT_SECS: u64 = 90;

/// How long a misbehaving peer stays banned.
pub const BAN_DURATION_SECS: u64 = 24 * 60 * 60;

pub const MAX_CONNECTIONS: usize = 32;

/// Hard cap on participant nodes per clustered subnet for new entrants.
pub const MAX_NODES_PER_SUBNET: usize = 2;
