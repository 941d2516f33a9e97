//! # tessera-lottery
//! The participation lottery: VRF evaluation and verification, the
//! participant registry, eligibility rules, target calibration, and
//! anti-clustering.

pub mod clustering;
pub mod producer;
pub mod proof;
pub mod registry;
pub mod target;
pub mod vrf;

pub use proof::{StakeProof, seal_block, unsigned_block_hash, verify_participation_proof};
pub use registry::{ParticipantRecord, ParticipantRegistry};
pub use vrf::{VrfProof, evaluate, lottery_seed, verify};
