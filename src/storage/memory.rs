//! In-memory block store

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{BlockStore, StoreError};
use crate::consensus::Block;
use crate::crypto::Hash;

#[derive(Debug, Default)]
struct Inner {
    blocks: HashMap<Hash, Block>,
    heights: HashMap<Hash, u32>,
    main_chain: Vec<Hash>,
}

/// Block store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }
}

impl BlockStore for MemoryStore {
    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.inner.read().blocks.contains_key(hash))
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }

    fn height_by_hash(&self, hash: &Hash) -> Result<u32, StoreError> {
        self.inner
            .read()
            .heights
            .get(hash)
            .copied()
            .ok_or(StoreError::NotInMainChain(*hash))
    }

    fn hash_at_height(&self, height: u32) -> Result<Option<Hash>, StoreError> {
        Ok(self.inner.read().main_chain.get(height as usize).copied())
    }

    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        self.inner.write().blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn connect_block(&self, hash: &Hash, height: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if height as usize != inner.main_chain.len() {
            return Err(StoreError::Corrupt(format!(
                "connect {hash} at height {height} but main chain has {} blocks",
                inner.main_chain.len()
            )));
        }
        inner.main_chain.push(*hash);
        inner.heights.insert(*hash, height);
        Ok(())
    }

    fn reorganize(&self, detach: &[Hash], attach: &[(Hash, u32)]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        let len = inner.main_chain.len();
        if detach.len() > len {
            return Err(StoreError::Corrupt(format!(
                "detach {} blocks from a main chain of {len}",
                detach.len()
            )));
        }
        for (i, hash) in detach.iter().enumerate() {
            if inner.main_chain[len - 1 - i] != *hash {
                return Err(StoreError::NotInMainChain(*hash));
            }
        }
        let base = len - detach.len();
        for (i, (hash, height)) in attach.iter().enumerate() {
            if *height as usize != base + i {
                return Err(StoreError::Corrupt(format!(
                    "attach {hash} at height {height}, expected {}",
                    base + i
                )));
            }
        }

        for hash in detach {
            inner.heights.remove(hash);
        }
        inner.main_chain.truncate(base);
        for (hash, height) in attach {
            inner.main_chain.push(*hash);
            inner.heights.insert(*hash, *height);
        }
        Ok(())
    }

    fn best_tip(&self) -> Result<Option<(Hash, u32)>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .main_chain
            .last()
            .map(|hash| (*hash, inner.main_chain.len() as u32 - 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::genesis_block;

    #[test]
    fn test_side_chain_blocks_have_no_height() {
        let store = MemoryStore::new();
        let block = genesis_block(0, 0x207fffff);
        let hash = block.hash();

        store.put_block(&block).unwrap();
        assert!(store.has_block(&hash).unwrap());
        assert!(matches!(store.height_by_hash(&hash), Err(StoreError::NotInMainChain(_))));

        store.connect_block(&hash, 0).unwrap();
        assert_eq!(store.height_by_hash(&hash).unwrap(), 0);
        assert_eq!(store.best_tip().unwrap(), Some((hash, 0)));
    }

    #[test]
    fn test_reorganize_switches_branch() {
        let store = MemoryStore::new();
        let [g, a1, a2, b1, b2, b3] = [0, 1, 2, 3, 4, 5].map(|t| genesis_block(t, 0x207fffff).hash());
        store.connect_block(&g, 0).unwrap();
        store.connect_block(&a1, 1).unwrap();
        store.connect_block(&a2, 2).unwrap();
        assert!(store.connect_block(&b1, 5).is_err());

        store.reorganize(&[a2, a1], &[(b1, 1), (b2, 2), (b3, 3)]).unwrap();
        assert_eq!(store.best_tip().unwrap(), Some((b3, 3)));
        assert_eq!(store.hash_at_height(1).unwrap(), Some(b1));
        assert!(matches!(store.height_by_hash(&a1), Err(StoreError::NotInMainChain(_))));
    }

    #[test]
    fn test_rejected_reorganize_leaves_main_chain() {
        let store = MemoryStore::new();
        let [g, a1, a2, b1] = [0, 1, 2, 3].map(|t| genesis_block(t, 0x207fffff).hash());
        store.connect_block(&g, 0).unwrap();
        store.connect_block(&a1, 1).unwrap();
        store.connect_block(&a2, 2).unwrap();

        // detach must start at the tip
        assert!(store.reorganize(&[a1], &[(b1, 1)]).is_err());
        // attach heights must follow the fork point
        assert!(store.reorganize(&[a2], &[(b1, 3)]).is_err());

        assert_eq!(store.best_tip().unwrap(), Some((a2, 2)));
        assert_eq!(store.height_by_hash(&a1).unwrap(), 1);
        assert_eq!(store.hash_at_height(2).unwrap(), Some(a2));
    }
}
