//! Database persistence layer using Sled
//!
//! Blocks are stored bincode-encoded by hash. The main chain is kept as two
//! indexes (hash -> height and height -> hash) plus the tip in a metadata
//! tree, all updated in one transaction per call.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use super::{BlockStore, StoreError};
use crate::consensus::Block;
use crate::crypto::Hash;

const TIP_KEY: &str = "tip";

/// Sled-backed block store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    blocks_tree: Tree,
    heights_tree: Tree,
    main_chain_tree: Tree,
    metadata_tree: Tree,
}

fn hash_from_slice(bytes: &[u8]) -> Result<Hash, StoreError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("hash record of {} bytes", bytes.len())))?;
    Ok(Hash(array))
}

fn height_from_slice(bytes: &[u8]) -> Result<u32, StoreError> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("height record of {} bytes", bytes.len())))?;
    Ok(u32::from_be_bytes(array))
}

fn tip_record(hash: &Hash, height: u32) -> Vec<u8> {
    let mut tip = Vec::with_capacity(36);
    tip.extend_from_slice(&hash.0);
    tip.extend_from_slice(&height.to_be_bytes());
    tip
}

fn unwrap_transaction(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Database(e),
    }
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let blocks_tree = db.open_tree("blocks")?;
        let heights_tree = db.open_tree("heights")?;
        let main_chain_tree = db.open_tree("main_chain")?;
        let metadata_tree = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks_tree,
            heights_tree,
            main_chain_tree,
            metadata_tree,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockStore for SledStore {
    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks_tree.contains_key(hash.0)?)
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.blocks_tree.get(hash.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn height_by_hash(&self, hash: &Hash) -> Result<u32, StoreError> {
        match self.heights_tree.get(hash.0)? {
            Some(bytes) => height_from_slice(&bytes),
            None => Err(StoreError::NotInMainChain(*hash)),
        }
    }

    fn hash_at_height(&self, height: u32) -> Result<Option<Hash>, StoreError> {
        match self.main_chain_tree.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(hash_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        let value = bincode::serialize(block)?;
        self.blocks_tree.insert(block.hash().0, value)?;
        Ok(())
    }

    fn connect_block(&self, hash: &Hash, height: u32) -> Result<(), StoreError> {
        let tip = tip_record(hash, height);

        (&self.heights_tree, &self.main_chain_tree, &self.metadata_tree)
            .transaction(|(heights, main_chain, metadata)| {
                heights.insert(hash.0.to_vec(), height.to_be_bytes().to_vec())?;
                main_chain.insert(height.to_be_bytes().to_vec(), hash.0.to_vec())?;
                metadata.insert(TIP_KEY, tip.as_slice())?;
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(unwrap_transaction)?;
        Ok(())
    }

    fn reorganize(&self, detach: &[Hash], attach: &[(Hash, u32)]) -> Result<(), StoreError> {
        // walk the tip back over `detach` before touching anything
        let mut tip = self.best_tip()?;
        let mut detached = Vec::with_capacity(detach.len());
        for hash in detach {
            match tip {
                Some((tip_hash, height)) if tip_hash == *hash => {
                    detached.push((*hash, height));
                    tip = match height.checked_sub(1) {
                        Some(h) => self.hash_at_height(h)?.map(|p| (p, h)),
                        None => None,
                    };
                }
                _ => return Err(StoreError::NotInMainChain(*hash)),
            }
        }

        let base = tip.map_or(0, |(_, height)| height + 1);
        for (i, (hash, height)) in attach.iter().enumerate() {
            if *height != base + i as u32 {
                return Err(StoreError::Corrupt(format!(
                    "attach {hash} at height {height}, expected {}",
                    base + i as u32
                )));
            }
        }
        let new_tip = attach.last().copied().or(tip).map(|(hash, height)| tip_record(&hash, height));

        (&self.heights_tree, &self.main_chain_tree, &self.metadata_tree)
            .transaction(|(heights, main_chain, metadata)| {
                for (hash, height) in &detached {
                    heights.remove(hash.0.to_vec())?;
                    main_chain.remove(height.to_be_bytes().to_vec())?;
                }
                for (hash, height) in attach {
                    heights.insert(hash.0.to_vec(), height.to_be_bytes().to_vec())?;
                    main_chain.insert(height.to_be_bytes().to_vec(), hash.0.to_vec())?;
                }
                match &new_tip {
                    Some(record) => {
                        metadata.insert(TIP_KEY, record.as_slice())?;
                    }
                    None => {
                        metadata.remove(TIP_KEY)?;
                    }
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(unwrap_transaction)?;
        Ok(())
    }

    fn best_tip(&self) -> Result<Option<(Hash, u32)>, StoreError> {
        match self.metadata_tree.get(TIP_KEY)? {
            Some(bytes) if bytes.len() == 36 => {
                Ok(Some((hash_from_slice(&bytes[..32])?, height_from_slice(&bytes[32..])?)))
            }
            Some(bytes) => Err(StoreError::Corrupt(format!("tip record of {} bytes", bytes.len()))),
            None => Ok(None),
        }
    }
}
