//! Orphan block pool
//!
//! Holds blocks whose parent has not arrived yet, keyed by their own hash
//! and by the parent hash they are waiting for. When the parent is
//! accepted the waiting children are drained and handed back to the block
//! processor.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::consensus::Block;
use crate::constants::{MAX_ORPHAN_BLOCKS, ORPHAN_EXPIRY_SECONDS};
use crate::crypto::Hash;

/// A block waiting for its parent
#[derive(Debug, Clone)]
pub struct OrphanBlock {
    pub block: Block,
    /// Unix time after which the orphan is dropped
    pub expiration: u64,
    sequence: u64,
}

/// Orphans indexed by hash and by missing parent hash
#[derive(Debug)]
pub struct OrphanPool {
    orphans: HashMap<Hash, OrphanBlock>,
    prev_orphans: HashMap<Hash, Vec<Hash>>,
    max_orphans: usize,
    next_sequence: u64,
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new(MAX_ORPHAN_BLOCKS)
    }
}

impl OrphanPool {
    pub fn new(max_orphans: usize) -> Self {
        Self {
            orphans: HashMap::new(),
            prev_orphans: HashMap::new(),
            max_orphans,
            next_sequence: 0,
        }
    }

    /// Add a block whose parent is unknown
    ///
    /// Expired orphans are dropped first; if the pool is still full the
    /// oldest orphan is evicted to make room.
    pub fn add(&mut self, block: Block, now: u64) {
        self.remove_expired(now);

        if self.max_orphans == 0 {
            return;
        }
        while self.orphans.len() >= self.max_orphans {
            let Some(oldest) = self.oldest() else { break };
            debug!(hash = %oldest, "Evicting oldest orphan block");
            self.remove(&oldest);
        }

        let hash = block.hash();
        let parent = *block.prev_hash();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.orphans.insert(
            hash,
            OrphanBlock {
                block,
                expiration: now + ORPHAN_EXPIRY_SECONDS,
                sequence,
            },
        );
        self.prev_orphans.entry(parent).or_default().push(hash);
    }

    /// Remove one orphan from both indexes
    pub fn remove(&mut self, hash: &Hash) -> Option<OrphanBlock> {
        let orphan = self.orphans.remove(hash)?;
        let parent = *orphan.block.prev_hash();
        if let Some(children) = self.prev_orphans.get_mut(&parent) {
            children.retain(|child| child != hash);
            if children.is_empty() {
                self.prev_orphans.remove(&parent);
            }
        }
        Some(orphan)
    }

    /// Take every orphan waiting for `parent` out of the pool
    ///
    /// The dependency list is detached before any child is dispatched, so
    /// the caller may freely add or remove orphans while handling them.
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let Some(children) = self.prev_orphans.remove(parent) else {
            return Vec::new();
        };

        let mut blocks = Vec::with_capacity(children.len());
        for (i, child) in children.iter().enumerate() {
            match self.orphans.remove(child) {
                Some(orphan) => blocks.push(orphan.block),
                None => warn!(
                    index = i,
                    parent = %parent,
                    "Found a missing entry in the orphan dependency list"
                ),
            }
        }
        blocks
    }

    pub fn is_known_orphan(&self, hash: &Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Earliest ancestor of `hash` still held as an orphan
    ///
    /// Returns `hash` itself when it is not an orphan.
    pub fn orphan_root(&self, hash: &Hash) -> Hash {
        let mut root = *hash;
        let mut prev = *hash;
        while let Some(orphan) = self.orphans.get(&prev) {
            root = prev;
            prev = *orphan.block.prev_hash();
        }
        root
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    fn remove_expired(&mut self, now: u64) {
        let expired: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| now > orphan.expiration)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in expired {
            debug!(hash = %hash, "Removing expired orphan block");
            self.remove(&hash);
        }
    }

    fn oldest(&self) -> Option<Hash> {
        self.orphans
            .iter()
            .min_by_key(|(_, orphan)| (orphan.expiration, orphan.sequence))
            .map(|(hash, _)| *hash)
    }
}
