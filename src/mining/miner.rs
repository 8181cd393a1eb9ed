//! Block miner implementation
//!
//! Assembles candidate blocks on the validated tip and searches nonces
//! with the chosen algorithm's hash function.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::chain::{BlockChain, ChainError};
use crate::consensus::{compact_to_big, Block, BlockHeader, Transaction};
use crate::crypto::{compute_merkle_root, Hash};
use crate::params::AlgorithmSpec;

/// Mining result
#[derive(Debug)]
pub enum MiningResult {
    /// Found a nonce meeting the target
    Success(Block),
    /// Mining was interrupted
    Interrupted,
}

/// Block miner
#[derive(Clone)]
pub struct Miner {
    /// Script paid by the coinbase
    payout_script: Vec<u8>,
    /// Stop signal
    stop_signal: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(payout_script: Vec<u8>) -> Self {
        Self {
            payout_script,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a stop signal handle
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Assemble a candidate block for `algorithm_name` on the best tip
    ///
    /// The legacy default algorithm carries the version-bits version; every
    /// other algorithm is selected by its own header version.
    pub fn assemble_block(
        &self,
        chain: &BlockChain,
        algorithm_name: &str,
    ) -> Result<(Block, AlgorithmSpec), ChainError> {
        let tip_hash = chain.best_hash();
        let height = chain.best_height() + 1;
        let params = chain.params();
        let fork = params.hard_fork(height);
        let algorithm = fork
            .algorithm_by_name(algorithm_name)
            .ok_or_else(|| ChainError::UnknownAlgorithm {
                name: algorithm_name.to_string(),
                height,
            })?
            .clone();

        let version = if fork.fallback_algorithm == Some(algorithm.name) {
            chain.calc_next_block_version()?
        } else {
            algorithm.version
        };
        let (bits, _) = chain.calc_next_required_difficulty(0, &tip_hash, algorithm.name, true)?;
        let timestamp = chain.adjusted_time().max(chain.median_time_past() + 1);

        let coinbase = Transaction::coinbase(height, 0, self.payout_script.clone());
        let merkle_root = compute_merkle_root(&[coinbase.hash()]);
        let header = BlockHeader::new(version, tip_hash, merkle_root, timestamp, bits, 0);

        debug!(height, algorithm = algorithm.name, version, bits = format!("{bits:08x}"), "Assembled block template");
        Ok((Block::new(header, vec![coinbase]), algorithm))
    }

    /// Mine a block (find valid nonce)
    ///
    /// Increments the nonce until the algorithm's hash meets the target or
    /// the stop signal is raised. The timestamp is bumped whenever the
    /// nonce space wraps.
    pub fn mine_block(
        &self,
        mut block: Block,
        algorithm: &AlgorithmSpec,
    ) -> Result<MiningResult, ChainError> {
        let target = compact_to_big(block.header.bits)
            .filter(|t| !t.is_zero())
            .ok_or(ChainError::InvalidTarget(block.header.bits))?;

        loop {
            if self.stop_signal.load(Ordering::SeqCst) {
                return Ok(MiningResult::Interrupted);
            }

            let pow_hash: Hash = algorithm.pow.hash_header(&block.header);
            if pow_hash.to_u256() <= target {
                return Ok(MiningResult::Success(block));
            }

            block.header.nonce = block.header.nonce.wrapping_add(1);
            if block.header.nonce == 0 {
                block.header.timestamp += 1;
            }
        }
    }
}
