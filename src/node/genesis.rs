//! Genesis block generation for Parallel Chain (PC)
//!
//! Each network starts from its own genesis block. Genesis is never mined
//! or validated; it is inserted directly as the root of the block graph.

use crate::consensus::{Block, BlockHeader, Transaction};
use crate::crypto::Hash;

/// Genesis block version (legacy sha256d)
const GENESIS_VERSION: i32 = 2;

/// Message committed in the genesis coinbase output
const GENESIS_MESSAGE: &[u8] = b"Parallel Chain genesis: nine algorithms, one ledger";

/// Create a genesis block
///
/// Produces a reproducible, byte-for-byte identical block for the same
/// timestamp and target.
pub fn genesis_block(timestamp: u64, bits: u32) -> Block {
    let coinbase = Transaction::coinbase(0, 0, GENESIS_MESSAGE.to_vec());

    let mut block = Block::new(
        BlockHeader::new(GENESIS_VERSION, Hash::zero(), Hash::zero(), timestamp, bits, 0),
        vec![coinbase],
    );
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// Genesis block statistics
#[derive(Debug)]
pub struct GenesisInfo {
    pub hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub bits: u32,
}

impl GenesisInfo {
    pub fn new(genesis: &Block) -> Self {
        Self {
            hash: genesis.hash(),
            merkle_root: genesis.header.merkle_root,
            timestamp: genesis.header.timestamp,
            bits: genesis.header.bits,
        }
    }
}
