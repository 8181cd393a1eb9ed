//! Soft-fork threshold state machine
//!
//! A rule moves `Defined -> Started -> LockedIn -> Active`, or from
//! `Defined`/`Started` to `Failed` once its end time passes. State only
//! changes at confirmation-window boundaries, so it is computed for the
//! last block of each window and memoised per block hash.

use std::collections::HashMap;
use std::fmt;

use crate::chain::{BlockIndex, ChainError, NodeId};
use crate::crypto::Hash;

/// Deployment state of a rule change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

impl fmt::Display for ThresholdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThresholdState::Defined => "defined",
            ThresholdState::Started => "started",
            ThresholdState::LockedIn => "locked in",
            ThresholdState::Active => "active",
            ThresholdState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Memoised states for one rule, keyed by the hash of a window's last block
#[derive(Debug, Default, Clone)]
pub struct ThresholdCache {
    entries: HashMap<Hash, ThresholdState>,
}

impl ThresholdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, hash: &Hash) -> Option<ThresholdState> {
        self.entries.get(hash).copied()
    }

    pub fn update(&mut self, hash: Hash, state: ThresholdState) {
        self.entries.insert(hash, state);
    }

    /// Forget the state stored for a block
    pub fn evict(&mut self, hash: &Hash) {
        self.entries.remove(hash);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameters and voting condition of one rule
pub trait ConditionChecker {
    /// Median time from which the rule may start
    fn begin_time(&self) -> u64;
    /// Median time after which an unactivated rule fails
    fn end_time(&self) -> u64;
    /// Blocks in a window that must signal for lock-in
    fn threshold(&self) -> u32;
    /// Blocks per confirmation window
    fn window(&self) -> u32;
    /// Whether `node` signals for the rule
    fn condition(&mut self, index: &BlockIndex, node: NodeId) -> Result<bool, ChainError>;
}

/// State of the rule for the block after `prev`
pub fn threshold_state<C>(
    index: &BlockIndex,
    prev: Option<NodeId>,
    checker: &mut C,
    cache: &mut ThresholdCache,
) -> Result<ThresholdState, ChainError>
where
    C: ConditionChecker + ?Sized,
{
    let window = checker.window();
    let Some(prev) = prev else {
        return Ok(ThresholdState::Defined);
    };
    let prev_height = index.node(prev).height;
    if window == 0 || prev_height + 1 < window {
        return Ok(ThresholdState::Defined);
    }

    // last block of the previous window
    let mut cursor = index.ancestor(prev, prev_height - (prev_height + 1) % window);

    let mut needed = Vec::new();
    while let Some(id) = cursor {
        let hash = index.node(id).hash;
        if cache.lookup(&hash).is_some() {
            break;
        }
        if index.median_time_past(id) < checker.begin_time() {
            cache.update(hash, ThresholdState::Defined);
            break;
        }
        needed.push(id);
        cursor = index.relative_ancestor(id, window);
    }

    let mut state = match cursor {
        Some(id) => {
            let hash = index.node(id).hash;
            cache
                .lookup(&hash)
                .ok_or_else(|| ChainError::Corrupt(format!("threshold state for {hash} missing")))?
        }
        None => ThresholdState::Defined,
    };

    for &id in needed.iter().rev() {
        let median_time = index.median_time_past(id);
        state = match state {
            ThresholdState::Defined => {
                if checker.end_time() <= median_time {
                    ThresholdState::Failed
                } else if checker.begin_time() <= median_time {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if checker.end_time() <= median_time {
                    ThresholdState::Failed
                } else {
                    let mut count = 0;
                    for node in index.ancestors(id).take(window as usize) {
                        if checker.condition(index, node)? {
                            count += 1;
                        }
                    }
                    if count >= checker.threshold() {
                        ThresholdState::LockedIn
                    } else {
                        ThresholdState::Started
                    }
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            terminal @ (ThresholdState::Active | ThresholdState::Failed) => terminal,
        };
        cache.update(index.node(id).hash, state);
    }

    Ok(state)
}
