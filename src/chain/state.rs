//! Chain state management
//!
//! `BlockChain` owns the block graph, the orphan pool and the version-bits
//! caches behind a single mutex, so block processing and the queries that
//! read the graph never interleave.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::orphan::OrphanPool;
use crate::chain::threshold::ThresholdState;
use crate::chain::versionbits::VersionBits;
use crate::chain::{retarget, BlockIndex, BlockNode, ChainError, NodeId};
use crate::consensus::{DefaultSanityChecker, SanityChecker, SystemTimeSource, TimeSource};
use crate::crypto::Hash;
use crate::params::{Network, Params};
use crate::storage::{BlockStore, StoreError};

/// Mutable state guarded by the chain lock
#[derive(Debug)]
pub struct ChainState {
    pub(crate) index: BlockIndex,
    pub(crate) best: NodeId,
    pub(crate) orphans: OrphanPool,
    pub(crate) versionbits: VersionBits,
}

impl ChainState {
    pub(crate) fn best_node(&self) -> &BlockNode {
        self.index.node(self.best)
    }
}

/// Result of processing one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// The block extends (or became) the best chain
    pub is_main_chain: bool,
    /// The block is waiting in the orphan pool for its parent
    pub is_orphan: bool,
}

/// Read-only summary of the chain for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub network: Network,
    pub best_hash: Hash,
    pub height: u32,
    pub bits: u32,
    pub median_time: u64,
    /// Cumulative work of the best chain, hex encoded
    pub total_work: String,
    pub block_count: usize,
    pub orphan_count: usize,
}

/// Validated block graph for one network
pub struct BlockChain {
    pub(crate) params: Params,
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) time_source: Arc<dyn TimeSource>,
    pub(crate) sanity: Arc<dyn SanityChecker>,
    pub(crate) state: Mutex<ChainState>,
}

impl BlockChain {
    /// Open a chain on `store` with the wall clock and default sanity checks
    pub fn new(params: Params, store: Arc<dyn BlockStore>) -> Result<Self, ChainError> {
        Self::with_components(
            params,
            store,
            Arc::new(SystemTimeSource),
            Arc::new(DefaultSanityChecker),
        )
    }

    /// Open a chain with explicit collaborators
    ///
    /// An empty store is initialised with the network's genesis block;
    /// otherwise the stored main chain is loaded into the block graph.
    pub fn with_components(
        params: Params,
        store: Arc<dyn BlockStore>,
        time_source: Arc<dyn TimeSource>,
        sanity: Arc<dyn SanityChecker>,
    ) -> Result<Self, ChainError> {
        let mut index = BlockIndex::new();

        let best = match store.best_tip()? {
            None => {
                store.put_block(&params.genesis_block)?;
                store.connect_block(&params.genesis_hash, 0)?;
                info!(network = %params.network, hash = %params.genesis_hash, "Initialised chain with genesis block");
                index.insert(&params.genesis_block.header, None)
            }
            Some((tip_hash, tip_height)) => {
                let best = load_main_chain(&params, store.as_ref(), &mut index, tip_height)?;
                if index.node(best).hash != tip_hash {
                    return Err(ChainError::Corrupt(format!(
                        "stored tip {tip_hash} does not match main chain at height {tip_height}"
                    )));
                }
                info!(network = %params.network, height = tip_height, hash = %tip_hash, "Loaded chain from store");
                best
            }
        };

        let versionbits = VersionBits::new(&params);
        Ok(Self {
            params,
            store,
            time_source,
            sanity,
            state: Mutex::new(ChainState {
                index,
                best,
                orphans: OrphanPool::default(),
                versionbits,
            }),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn best_hash(&self) -> Hash {
        self.state.lock().best_node().hash
    }

    pub fn best_height(&self) -> u32 {
        self.state.lock().best_node().height
    }

    /// Copy of the graph node for `hash`
    pub fn lookup_node(&self, hash: &Hash) -> Option<BlockNode> {
        self.state.lock().index.get(hash).cloned()
    }

    /// Network-adjusted clock used for timestamp checks
    pub fn adjusted_time(&self) -> u64 {
        self.time_source.adjusted_time()
    }

    /// Median time past of the best chain tip
    pub fn median_time_past(&self) -> u64 {
        let state = self.state.lock();
        state.index.median_time_past(state.best)
    }

    /// Whether the block is known in the graph, the store or the orphan pool
    pub fn have_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        let state = self.state.lock();
        if state.orphans.is_known_orphan(hash) {
            return Ok(true);
        }
        self.block_exists(&state, hash)
    }

    pub fn is_known_orphan(&self, hash: &Hash) -> bool {
        self.state.lock().orphans.is_known_orphan(hash)
    }

    /// Earliest orphan ancestor of `hash`, for requesting the missing parent
    pub fn orphan_root(&self, hash: &Hash) -> Hash {
        self.state.lock().orphans.orphan_root(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.state.lock().orphans.len()
    }

    /// Version the next block on the best chain should carry
    pub fn calc_next_block_version(&self) -> Result<i32, ChainError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state
            .versionbits
            .next_block_version(&self.params, &state.index, Some(state.best))
    }

    /// Required target and adjustment for the next `algorithm_name` block
    /// after `tip_hash`
    pub fn calc_next_required_difficulty(
        &self,
        worker_id: u32,
        tip_hash: &Hash,
        algorithm_name: &str,
        log: bool,
    ) -> Result<(u32, f64), ChainError> {
        let state = self.state.lock();
        let tip = state
            .index
            .lookup(tip_hash)
            .ok_or(ChainError::UnknownBlock(*tip_hash))?;
        retarget::calc_next_required_difficulty(
            &self.params,
            &state.index,
            tip,
            algorithm_name,
            worker_id,
            log,
        )
    }

    /// State of a named deployment for the next block, None if no such
    /// deployment exists
    pub fn deployment_state(&self, name: &str) -> Result<Option<ThresholdState>, ChainError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state
            .versionbits
            .deployment_state(&self.params, &state.index, Some(state.best), name)
            .transpose()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.lock();
        let best = state.best_node();
        ChainSnapshot {
            network: self.params.network,
            best_hash: best.hash,
            height: best.height,
            bits: best.bits,
            median_time: state.index.median_time_past(state.best),
            total_work: format!("{:x}", best.work_sum),
            block_count: state.index.len(),
            orphan_count: state.orphans.len(),
        }
    }

    /// Known in the graph, or on the store's main chain
    ///
    /// Stored blocks without a main-chain height are side-chain leftovers
    /// and count as absent.
    pub(crate) fn block_exists(&self, state: &ChainState, hash: &Hash) -> Result<bool, ChainError> {
        if state.index.contains(hash) {
            return Ok(true);
        }
        if !self.store.has_block(hash)? {
            return Ok(false);
        }
        match self.store.height_by_hash(hash) {
            Ok(_) => Ok(true),
            Err(StoreError::NotInMainChain(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rebuild the graph from the store's main-chain index
fn load_main_chain(
    params: &Params,
    store: &dyn BlockStore,
    index: &mut BlockIndex,
    tip_height: u32,
) -> Result<NodeId, ChainError> {
    let mut parent = None;
    for height in 0..=tip_height {
        let hash = store
            .hash_at_height(height)?
            .ok_or_else(|| ChainError::Corrupt(format!("main chain has no block at height {height}")))?;
        let block = store
            .fetch_block(&hash)?
            .ok_or_else(|| ChainError::Corrupt(format!("main chain block {hash} missing")))?;

        if height == 0 && hash != params.genesis_hash {
            return Err(ChainError::GenesisMismatch {
                stored: hash,
                expected: params.genesis_hash,
            });
        }
        if let Some(p) = parent {
            if index.node(p).hash != block.header.prev_hash {
                return Err(ChainError::Corrupt(format!(
                    "block {hash} at height {height} does not extend the main chain"
                )));
            }
        }
        parent = Some(index.insert(&block.header, parent));
    }
    parent.ok_or_else(|| ChainError::Corrupt("empty main chain".to_string()))
}
