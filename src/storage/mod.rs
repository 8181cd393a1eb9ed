//! Storage module - block persistence and the main-chain height index
//!
//! The chain logic only talks to [`BlockStore`]; `MemoryStore` backs tests
//! and `SledStore` persists to disk.

mod memory;
pub mod db;

pub use db::SledStore;
pub use memory::*;

use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::Hash;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The block is stored (or unknown) but not part of the main chain
    #[error("Block {0} is not in the main chain")]
    NotInMainChain(Hash),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Persistent block storage with a main-chain index
///
/// Every method is atomic on its own; callers serialise sequences of calls.
pub trait BlockStore: Send + Sync {
    /// Whether the block is stored, on any chain
    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError>;

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    /// Main-chain height of a block, `NotInMainChain` for side-chain or
    /// unknown blocks
    fn height_by_hash(&self, hash: &Hash) -> Result<u32, StoreError>;

    fn hash_at_height(&self, height: u32) -> Result<Option<Hash>, StoreError>;

    /// Store a block without attaching it to the main chain
    fn put_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Make `hash` the main-chain block at `height` and the new tip
    fn connect_block(&self, hash: &Hash, height: u32) -> Result<(), StoreError>;

    /// Switch the main chain in one step: detach `detach` (tip first) and
    /// then attach `attach` (lowest first) at the given heights
    ///
    /// Either the whole switch is applied or the main chain is left as it
    /// was.
    fn reorganize(&self, detach: &[Hash], attach: &[(Hash, u32)]) -> Result<(), StoreError>;

    /// Hash and height of the main-chain tip, None for an empty store
    fn best_tip(&self) -> Result<Option<(Hash, u32)>, StoreError>;
}
