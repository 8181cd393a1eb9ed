//! Checkpoint lookups

use crate::chain::{BlockIndex, NodeId};
use crate::crypto::Hash;
use crate::params::Params;

/// Most recent checkpoint at or below `height` whose block is known
pub fn find_previous_checkpoint(params: &Params, index: &BlockIndex, height: u32) -> Option<NodeId> {
    params
        .checkpoints
        .iter()
        .rev()
        .filter(|cp| cp.height <= height)
        .find_map(|cp| {
            let id = index.lookup(&cp.hash)?;
            (index.node(id).height == cp.height).then_some(id)
        })
}

/// Whether a block at `height` agrees with any checkpoint at that height
pub fn verify_checkpoint(params: &Params, height: u32, hash: &Hash) -> bool {
    match params.checkpoint_at(height) {
        Some(cp) => cp.hash == *hash,
        None => true,
    }
}
