//! Block processing entry point

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::chain::checkpoint::find_previous_checkpoint;
use crate::chain::error::rule_error;
use crate::chain::{BlockChain, ChainError, ChainState, ProcessOutcome};
use crate::consensus::{
    calc_easiest_difficulty, check_proof_of_work, compact_to_big, BehaviorFlags, Block, ErrorCode,
};
use crate::crypto::Hash;
use crate::params::AlgorithmSpec;

impl BlockChain {
    /// Validate a block and add it to the chain or the orphan pool
    ///
    /// `height_hint` is used as the block height only when the parent is
    /// not known yet. Once accepted, any orphans waiting on the block are
    /// processed too.
    pub fn process_block(
        &self,
        block: &Block,
        flags: BehaviorFlags,
        height_hint: u32,
    ) -> Result<ProcessOutcome, ChainError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let hash = block.hash();
        let parent = state.index.lookup(block.prev_hash());
        let height = match parent {
            Some(id) => state.index.node(id).height + 1,
            None => height_hint,
        };
        debug!(hash = %hash, height, "Processing block");

        if self.block_exists(state, &hash)? {
            return Err(rule_error(
                ErrorCode::DuplicateBlock,
                format!("already have block {hash}"),
            ));
        }
        if state.orphans.is_known_orphan(&hash) {
            return Err(rule_error(
                ErrorCode::DuplicateBlock,
                format!("already have block (orphan) {hash}"),
            ));
        }

        let algorithm = self.resolve_algorithm(block, &hash, height)?;
        let skip_pow = self.skip_pow(state, block, height);

        self.sanity.check_block_sanity(
            block,
            algorithm,
            self.time_source.as_ref(),
            flags,
            skip_pow,
        )?;

        self.check_against_checkpoint(state, block, &hash, height, flags)?;

        if parent.is_none() {
            let parent_hash = *block.prev_hash();
            info!(hash = %hash, parent = %parent_hash, "Adding orphan block");
            state.orphans.add(block.clone(), self.time_source.adjusted_time());
            return Ok(ProcessOutcome {
                is_main_chain: false,
                is_orphan: true,
            });
        }

        let is_main_chain = self.maybe_accept_block(state, block, flags)?;
        self.process_orphans(state, hash, flags)?;

        Ok(ProcessOutcome {
            is_main_chain,
            is_orphan: false,
        })
    }

    fn resolve_algorithm(
        &self,
        block: &Block,
        hash: &Hash,
        height: u32,
    ) -> Result<&AlgorithmSpec, ChainError> {
        self.params
            .algorithm_for(block.header.version, height)
            .ok_or_else(|| {
                rule_error(
                    ErrorCode::UnknownAlgorithm,
                    format!(
                        "block {hash} version {} selects no algorithm at height {height}",
                        block.header.version
                    ),
                )
            })
    }

    /// Proof of work is only checked once the block's parent and an
    /// earlier block of the same algorithm are known
    fn skip_pow(&self, state: &ChainState, block: &Block, height: u32) -> bool {
        let Some(parent) = state.index.lookup(block.prev_hash()) else {
            return true;
        };
        let Some(key) = self.params.algorithm_key(block.header.version, height) else {
            return true;
        };
        state
            .index
            .last_matching(parent, |node| {
                self.params.algorithm_key(node.version, node.height) == Some(key)
            })
            .is_none()
    }

    /// Reject blocks older than, or too easy relative to, the latest
    /// checkpoint below them
    fn check_against_checkpoint(
        &self,
        state: &ChainState,
        block: &Block,
        hash: &Hash,
        height: u32,
        flags: BehaviorFlags,
    ) -> Result<(), ChainError> {
        let Some(checkpoint) = find_previous_checkpoint(&self.params, &state.index, height) else {
            return Ok(());
        };
        let checkpoint = state.index.node(checkpoint);

        if block.header.timestamp < checkpoint.timestamp {
            return Err(rule_error(
                ErrorCode::CheckpointTimeTooOld,
                format!(
                    "block {hash} has timestamp {} before last checkpoint timestamp {}",
                    block.header.timestamp, checkpoint.timestamp
                ),
            ));
        }

        if !flags.contains(BehaviorFlags::FAST_ADD) {
            let duration = block.header.timestamp - checkpoint.timestamp;
            let required_bits = calc_easiest_difficulty(&self.params, checkpoint.bits, duration);
            let required = compact_to_big(required_bits).ok_or(ChainError::InvalidTarget(required_bits))?;
            let target = compact_to_big(block.header.bits)
                .ok_or(ChainError::InvalidTarget(block.header.bits))?;
            if target > required {
                return Err(rule_error(
                    ErrorCode::DifficultyTooLow,
                    format!(
                        "block {hash} target difficulty of {:08x} is too low when compared to the previous checkpoint",
                        block.header.bits
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Accept every orphan that descends from `root`, breadth first
    ///
    /// Orphans that break a rule are dropped and logged; they do not affect
    /// the outcome of the block that released them. Any other failure stops
    /// the cascade and is returned. Released orphans that were not accepted
    /// are out of the pool and out of the graph, so they can be submitted
    /// again.
    fn process_orphans(
        &self,
        state: &mut ChainState,
        root: Hash,
        flags: BehaviorFlags,
    ) -> Result<(), ChainError> {
        let mut queue = VecDeque::from([root]);

        while let Some(parent) = queue.pop_front() {
            let mut children = state.orphans.take_children(&parent).into_iter();
            while let Some(orphan) = children.next() {
                let hash = orphan.hash();
                match self.accept_orphan(state, &orphan, flags) {
                    Ok(is_main_chain) => {
                        debug!(hash = %hash, is_main_chain, "Accepted orphan block");
                        queue.push_back(hash);
                    }
                    Err(ChainError::Rule(e)) => {
                        warn!(hash = %hash, error = %e, "Rejected orphan block");
                    }
                    Err(e) => {
                        // orphans waiting on accepted blocks would never be
                        // released again
                        let mut dropped = children.len();
                        for pending in queue.drain(..) {
                            dropped += state.orphans.take_children(&pending).len();
                        }
                        warn!(
                            hash = %hash,
                            dropped,
                            error = %e,
                            "Orphan processing aborted"
                        );
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Accept a released orphan, checking the proof of work that was
    /// skipped while its parent was missing
    fn accept_orphan(
        &self,
        state: &mut ChainState,
        block: &Block,
        flags: BehaviorFlags,
    ) -> Result<bool, ChainError> {
        let parent = state
            .index
            .lookup(block.prev_hash())
            .ok_or(ChainError::UnknownBlock(*block.prev_hash()))?;
        let height = state.index.node(parent).height + 1;
        let algorithm = self.resolve_algorithm(block, &block.hash(), height)?;
        let skip_pow = self.skip_pow(state, block, height);
        check_proof_of_work(&block.header, algorithm, flags, skip_pow)?;
        self.maybe_accept_block(state, block, flags)
    }
}
