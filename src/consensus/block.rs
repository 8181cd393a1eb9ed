//! Block structure for Parallel Chain
//!
//! The header `version` doubles as the algorithm selector: before the Plan9
//! hard fork it is a legacy magic number (or a version-bits field), after it
//! the version names the mining algorithm directly.

use serde::{Deserialize, Serialize};
use crate::consensus::Transaction;
use crate::crypto::{compute_merkle_root, Hash};

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Algorithm / version-bits field
    pub version: i32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Merkle root of all transactions
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Difficulty target (compact representation)
    pub bits: u32,
    /// Nonce used for PoW
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: i32,
        prev_hash: Hash,
        merkle_root: Hash,
        timestamp: u64,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Serialize the header for hashing (identity and proof of work)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Identity hash of this header
    pub fn hash(&self) -> Hash {
        crate::crypto::hash_bytes(&self.to_bytes())
    }
}

/// Serialized header length in bytes
pub const HEADER_SIZE: usize = 4 + 32 + 32 + 8 + 4 + 4;

/// A complete block containing header and transactions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    /// Merkle root committed by the transactions actually present
    pub fn compute_merkle_root(&self) -> Hash {
        let tx_hashes: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        compute_merkle_root(&tx_hashes)
    }

    /// Check if this is a genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash == Hash::zero()
    }
}
