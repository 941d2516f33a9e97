//! # tessera-consensus
//! The chain state manager: block index, validation pipeline, best-tip
//! selection, and reorganization.

pub mod chain;
pub mod index;
pub mod work;

pub use chain::{AcceptOutcome, ChainError, ChainManager};
pub use index::{BlockIndexArena, BlockIndexEntry, status};
