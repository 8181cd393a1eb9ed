//! Parallel Chain (PC) Core Library
//!
//! Block validation and chain selection for a proof-of-work chain mined
//! with several hashing algorithms at once. Every node must reach the same
//! verdict for every block, so everything here is deterministic.
//!
//! The entry point is [`chain::BlockChain::process_block`].

pub mod consensus;
pub mod crypto;
pub mod params;
pub mod chain;
pub mod storage;
pub mod mining;
pub mod node;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Number of previous blocks used to compute the median time past
    pub const MEDIAN_TIME_BLOCKS: usize = 11;

    /// Maximum seconds a block timestamp may be ahead of adjusted time
    pub const MAX_TIME_OFFSET_SECONDS: u64 = 2 * 60 * 60;

    /// Maximum number of orphan blocks held in memory
    pub const MAX_ORPHAN_BLOCKS: usize = 100;

    /// Seconds an orphan block is kept before it expires
    pub const ORPHAN_EXPIRY_SECONDS: u64 = 60 * 60;

    /// Minimum number of same-algorithm timestamps before smoothing applies
    pub const MIN_AVERAGING_SAMPLES: usize = 3;

    /// Chain name (short form)
    pub const CHAIN_NAME: &str = "PC";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "Parallel Chain";
}
