//! Context-free block checks
//!
//! Everything that can be decided from a block on its own (plus the clock
//! and the resolved mining algorithm). Checks that need the block graph
//! live in `chain::accept`.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::consensus::{compact_to_big, Block, BlockHeader};
use crate::constants::MAX_TIME_OFFSET_SECONDS;
use crate::crypto::Hash;
use crate::params::AlgorithmSpec;

/// Kind of consensus rule a block broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DuplicateBlock,
    CheckpointTimeTooOld,
    DifficultyTooLow,
    UnexpectedDifficulty,
    HighHash,
    TimeTooNew,
    TimeTooOld,
    NoTransactions,
    FirstTxNotCoinbase,
    MultipleCoinbases,
    BadMerkleRoot,
    DuplicateTx,
    PreviousBlockUnknown,
    BadCheckpoint,
    UnknownAlgorithm,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::DuplicateBlock => "ErrDuplicateBlock",
            ErrorCode::CheckpointTimeTooOld => "ErrCheckpointTimeTooOld",
            ErrorCode::DifficultyTooLow => "ErrDifficultyTooLow",
            ErrorCode::UnexpectedDifficulty => "ErrUnexpectedDifficulty",
            ErrorCode::HighHash => "ErrHighHash",
            ErrorCode::TimeTooNew => "ErrTimeTooNew",
            ErrorCode::TimeTooOld => "ErrTimeTooOld",
            ErrorCode::NoTransactions => "ErrNoTransactions",
            ErrorCode::FirstTxNotCoinbase => "ErrFirstTxNotCoinbase",
            ErrorCode::MultipleCoinbases => "ErrMultipleCoinbases",
            ErrorCode::BadMerkleRoot => "ErrBadMerkleRoot",
            ErrorCode::DuplicateTx => "ErrDuplicateTx",
            ErrorCode::PreviousBlockUnknown => "ErrPreviousBlockUnknown",
            ErrorCode::BadCheckpoint => "ErrBadCheckpoint",
            ErrorCode::UnknownAlgorithm => "ErrUnknownAlgorithm",
        };
        f.write_str(name)
    }
}

/// A block violated a consensus rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct RuleError {
    pub code: ErrorCode,
    pub description: String,
}

impl RuleError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

bitflags::bitflags! {
    /// Options that relax block processing
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BehaviorFlags: u32 {
        /// Block is already known good (e.g. below a checkpoint): skip the
        /// expensive contextual difficulty checks
        const FAST_ADD = 1 << 0;
        /// Do not compare the proof-of-work hash against the target
        const NO_POW_CHECK = 1 << 1;
    }
}

impl BehaviorFlags {
    pub const NONE: BehaviorFlags = BehaviorFlags::empty();
}

/// Source of network-adjusted time in unix seconds
pub trait TimeSource: Send + Sync {
    fn adjusted_time(&self) -> u64;
}

/// Local wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn adjusted_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct FixedTimeSource(AtomicU64);

impl FixedTimeSource {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn adjusted_time(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Check the claimed target against the algorithm floor and, unless
/// skipped, the proof-of-work hash against the claimed target
pub fn check_proof_of_work(
    header: &BlockHeader,
    algorithm: &AlgorithmSpec,
    flags: BehaviorFlags,
    skip_pow: bool,
) -> Result<(), RuleError> {
    let target = match compact_to_big(header.bits) {
        Some(target) if !target.is_zero() => target,
        _ => {
            return Err(RuleError::new(
                ErrorCode::UnexpectedDifficulty,
                format!("block target difficulty of {:08x} is not a positive value", header.bits),
            ))
        }
    };

    let floor = compact_to_big(algorithm.pow_limit_bits).unwrap_or_default();
    if target > floor {
        return Err(RuleError::new(
            ErrorCode::UnexpectedDifficulty,
            format!(
                "block target difficulty of {:08x} is higher than max of {:08x} for {}",
                header.bits, algorithm.pow_limit_bits, algorithm.name
            ),
        ));
    }

    if skip_pow || flags.contains(BehaviorFlags::NO_POW_CHECK) {
        return Ok(());
    }

    let pow_hash = algorithm.pow.hash_header(header);
    if pow_hash.to_u256() > target {
        return Err(RuleError::new(
            ErrorCode::HighHash,
            format!(
                "block {} {} hash {} is higher than expected max of {:08x}",
                header.hash(),
                algorithm.name,
                pow_hash,
                header.bits
            ),
        ));
    }
    Ok(())
}

/// Structure checks on a block's transactions
pub fn check_transactions(block: &Block) -> Result<(), RuleError> {
    let hash = block.hash();
    let Some(first) = block.transactions.first() else {
        return Err(RuleError::new(
            ErrorCode::NoTransactions,
            format!("block {hash} does not contain any transactions"),
        ));
    };
    if !first.is_coinbase() {
        return Err(RuleError::new(
            ErrorCode::FirstTxNotCoinbase,
            format!("first transaction in block {hash} is not a coinbase"),
        ));
    }
    if let Some(i) = block.transactions.iter().skip(1).position(|tx| tx.is_coinbase()) {
        return Err(RuleError::new(
            ErrorCode::MultipleCoinbases,
            format!("block {hash} contains second coinbase at index {}", i + 1),
        ));
    }

    let tx_hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
    let merkle_root = crate::crypto::compute_merkle_root(&tx_hashes);
    if merkle_root != block.header.merkle_root {
        return Err(RuleError::new(
            ErrorCode::BadMerkleRoot,
            format!(
                "block {hash} merkle root is invalid - header indicates {}, but calculated value is {merkle_root}",
                block.header.merkle_root
            ),
        ));
    }

    let mut seen = HashSet::with_capacity(tx_hashes.len());
    for tx_hash in &tx_hashes {
        if !seen.insert(tx_hash) {
            return Err(RuleError::new(
                ErrorCode::DuplicateTx,
                format!("block {hash} contains duplicate transaction {tx_hash}"),
            ));
        }
    }
    Ok(())
}

/// Context-free block validation consumed by the block processor
pub trait SanityChecker: Send + Sync {
    fn check_block_sanity(
        &self,
        block: &Block,
        algorithm: &AlgorithmSpec,
        time_source: &dyn TimeSource,
        flags: BehaviorFlags,
        skip_pow: bool,
    ) -> Result<(), RuleError>;
}

/// Proof of work, timestamp and transaction structure
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSanityChecker;

impl SanityChecker for DefaultSanityChecker {
    fn check_block_sanity(
        &self,
        block: &Block,
        algorithm: &AlgorithmSpec,
        time_source: &dyn TimeSource,
        flags: BehaviorFlags,
        skip_pow: bool,
    ) -> Result<(), RuleError> {
        check_proof_of_work(&block.header, algorithm, flags, skip_pow)?;

        let max_timestamp = time_source.adjusted_time() + MAX_TIME_OFFSET_SECONDS;
        if block.header.timestamp > max_timestamp {
            return Err(RuleError::new(
                ErrorCode::TimeTooNew,
                format!(
                    "block {} timestamp of {} is too far in the future",
                    block.hash(),
                    block.header.timestamp
                ),
            ));
        }

        check_transactions(block)
    }
}
