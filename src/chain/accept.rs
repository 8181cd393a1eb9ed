//! Contextual acceptance and best chain selection

use tracing::{debug, info, warn};

use crate::chain::checkpoint::verify_checkpoint;
use crate::chain::error::rule_error;
use crate::chain::{retarget, BlockChain, ChainError, ChainState, NodeId};
use crate::consensus::{BehaviorFlags, Block, ErrorCode};
use crate::crypto::Hash;

impl BlockChain {
    /// Check a block against its parent and add it to the block graph
    ///
    /// Returns whether the block ended up on the main chain. The parent must
    /// already be in the graph.
    pub(crate) fn maybe_accept_block(
        &self,
        state: &mut ChainState,
        block: &Block,
        flags: BehaviorFlags,
    ) -> Result<bool, ChainError> {
        let hash = block.hash();
        let parent = state.index.lookup(block.prev_hash()).ok_or_else(|| {
            rule_error(
                ErrorCode::PreviousBlockUnknown,
                format!("previous block {} of block {hash} is unknown", block.prev_hash()),
            )
        })?;
        let height = state.index.node(parent).height + 1;

        let algorithm = self
            .params
            .algorithm_for(block.header.version, height)
            .ok_or_else(|| {
                rule_error(
                    ErrorCode::UnknownAlgorithm,
                    format!(
                        "block {hash} version {} selects no algorithm at height {height}",
                        block.header.version
                    ),
                )
            })?;

        if !flags.contains(BehaviorFlags::FAST_ADD) {
            let (required, _) = retarget::calc_next_required_difficulty(
                &self.params,
                &state.index,
                parent,
                algorithm.name,
                0,
                false,
            )?;
            if block.header.bits != required {
                return Err(rule_error(
                    ErrorCode::UnexpectedDifficulty,
                    format!(
                        "block {hash} {} difficulty of {:08x} is not the expected value of {required:08x}",
                        algorithm.name, block.header.bits
                    ),
                ));
            }

            let median_time = state.index.median_time_past(parent);
            if block.header.timestamp <= median_time {
                return Err(rule_error(
                    ErrorCode::TimeTooOld,
                    format!(
                        "block {hash} timestamp of {} is not after expected {median_time}",
                        block.header.timestamp
                    ),
                ));
            }
        }

        if !verify_checkpoint(&self.params, height, &hash) {
            return Err(rule_error(
                ErrorCode::BadCheckpoint,
                format!("block {hash} at height {height} does not match checkpoint hash"),
            ));
        }

        // a stored block without a main-chain height counts as absent, so a
        // failure after this point still lets the block be submitted again
        self.store.put_block(block)?;
        let inserted = !state.index.contains(&hash);
        let node = state.index.insert(&block.header, Some(parent));
        let is_main_chain = match self.connect_best_chain(state, node) {
            Ok(is_main_chain) => is_main_chain,
            Err(e) => {
                if inserted {
                    state.index.remove_last(node);
                }
                return Err(e);
            }
        };

        if is_main_chain {
            if let Err(e) = state
                .versionbits
                .warn_unknown_rule_activations(&self.params, &state.index, node)
            {
                warn!(error = %e, "Unknown rule activation check failed");
            }
        }

        debug!(height, hash = %hash, algorithm = algorithm.name, is_main_chain, "Accepted block");
        Ok(is_main_chain)
    }

    /// Make `node` the best tip if it has the most work
    fn connect_best_chain(&self, state: &mut ChainState, node: NodeId) -> Result<bool, ChainError> {
        let best = state.best;
        let candidate = state.index.node(node);

        if candidate.parent == Some(best) {
            self.store.connect_block(&candidate.hash, candidate.height)?;
            state.best = node;
            return Ok(true);
        }

        if candidate.work_sum <= state.index.node(best).work_sum {
            debug!(
                hash = %candidate.hash,
                height = candidate.height,
                "Block extends a side chain"
            );
            return Ok(false);
        }

        self.reorganize(state, node)?;
        Ok(true)
    }

    /// Switch the main chain to end at `new_tip`
    ///
    /// The store applies the whole switch or none of it; graph state only
    /// moves once it has.
    fn reorganize(&self, state: &mut ChainState, new_tip: NodeId) -> Result<(), ChainError> {
        let old_tip = state.best;
        let fork = state
            .index
            .find_fork(old_tip, new_tip)
            .ok_or_else(|| ChainError::Corrupt("reorganize across unrelated chains".to_string()))?;

        let detach: Vec<Hash> = state
            .index
            .ancestors(old_tip)
            .take_while(|&id| id != fork)
            .map(|id| state.index.node(id).hash)
            .collect();
        let mut attach: Vec<(Hash, u32)> = state
            .index
            .ancestors(new_tip)
            .take_while(|&id| id != fork)
            .map(|id| {
                let node = state.index.node(id);
                (node.hash, node.height)
            })
            .collect();
        attach.reverse();

        self.store.reorganize(&detach, &attach)?;
        for hash in &detach {
            state.versionbits.evict(hash);
        }
        state.best = new_tip;

        let fork_node = state.index.node(fork);
        info!(
            fork_height = fork_node.height,
            fork_hash = %fork_node.hash,
            detached = detach.len(),
            attached = attach.len(),
            new_tip = %state.index.node(new_tip).hash,
            "Chain reorganization"
        );
        Ok(())
    }
}
