//! Next required target per mining algorithm
//!
//! Collects timestamp series from the block graph and feeds them through
//! the arithmetic in `consensus::difficulty`. The strategy is chosen by the
//! hard fork governing the next height.

use tracing::debug;

use crate::chain::{BlockIndex, ChainError, NodeId};
use crate::consensus::{
    big_to_compact, cap_adjustment, compact_to_big, ewma_interval, mean_interval, scale_target,
};
use crate::constants::MIN_AVERAGING_SAMPLES;
use crate::params::{AlgorithmKey, AlgorithmSpec, HardFork, Params, RetargetStrategy};

const DAY_SECONDS: u64 = 24 * 60 * 60;
const HOUR_SECONDS: u64 = 60 * 60;
const QUARTER_HOUR_SECONDS: u64 = 15 * 60;

/// Last same-algorithm block before the next one
#[derive(Debug, Clone, Copy)]
struct LastBlock {
    bits: u32,
    timestamp: Option<u64>,
}

/// Timestamp series gathered for one retarget
#[derive(Debug, Default)]
struct Samples {
    /// Same-algorithm timestamps, newest first
    algorithm: Vec<u64>,
    /// All timestamps, newest first
    all: Vec<u64>,
    /// Newest same-algorithm block inside the averaging range
    last: Option<NodeId>,
}

/// Walk back from `tip` over heights above the averaging floor
fn collect_samples(
    params: &Params,
    index: &BlockIndex,
    tip: NodeId,
    fork: &HardFork,
    key: AlgorithmKey,
) -> Samples {
    let mut samples = Samples::default();
    let limit = fork.averaging_interval;

    for id in index.ancestors(tip) {
        let node = index.node(id);
        if node.height <= fork.averaging_floor {
            break;
        }
        if samples.algorithm.len() >= limit && samples.all.len() >= limit {
            break;
        }
        if samples.all.len() < limit {
            samples.all.push(node.timestamp);
        }
        if params.algorithm_key(node.version, node.height) == Some(key) {
            if samples.last.is_none() {
                samples.last = Some(id);
            }
            if samples.algorithm.len() < limit {
                samples.algorithm.push(node.timestamp);
            }
        }
    }
    samples
}

/// Mean-interval factor over the part of `all` within `window` seconds of
/// the newest timestamp, neutral without enough samples
fn window_factor(all: &[u64], window: u64, expected: f64, cap: f64) -> f64 {
    let Some(&newest) = all.first() else {
        return 1.0;
    };
    let recent: Vec<u64> = all
        .iter()
        .copied()
        .take_while(|&ts| newest.saturating_sub(ts) <= window)
        .collect();
    if recent.len() < MIN_AVERAGING_SAMPLES {
        return 1.0;
    }
    mean_interval(&recent)
        .map(|mean| cap_adjustment(mean / expected, cap))
        .unwrap_or(1.0)
}

/// Plan9: EWMA of this algorithm's intervals, blended with a neutral
/// all-algorithm term
fn plan9_adjustment(fork: &HardFork, algorithm: &AlgorithmSpec, samples: &Samples) -> (f64, f64) {
    let interval = algorithm.interval as f64;
    let algos = fork.algorithms.len() as f64;

    let mut average = interval;
    let mut algorithm_factor = 1.0;
    if samples.algorithm.len() >= MIN_AVERAGING_SAMPLES {
        average = ewma_interval(&samples.algorithm);
        algorithm_factor = cap_adjustment(average / interval / algos, fork.adjustment_cap);
    }
    let all_factor = 1.0;

    ((algorithm_factor + all_factor) / 2.0, average)
}

/// Legacy: mean of six capped interval ratios
fn blended_adjustment(
    fork: &HardFork,
    algorithm: &AlgorithmSpec,
    samples: &Samples,
    tip_timestamp: u64,
    last: LastBlock,
) -> (f64, f64) {
    let interval = algorithm.interval as f64;
    let algos = fork.algorithms.len() as f64;
    let cap = fork.adjustment_cap;

    let all_time = if samples.all.len() >= MIN_AVERAGING_SAMPLES {
        mean_interval(&samples.all)
            .map(|mean| cap_adjustment(mean / interval, cap))
            .unwrap_or(1.0)
    } else {
        1.0
    };

    let mut average = interval * algos;
    let mut algorithm_factor = 1.0;
    if samples.algorithm.len() >= MIN_AVERAGING_SAMPLES {
        if let Some(mean) = mean_interval(&samples.algorithm) {
            average = mean;
            algorithm_factor = cap_adjustment(mean / (interval * algos), cap);
        }
    }

    let day = window_factor(&samples.all, DAY_SECONDS, interval, cap);
    let hour = window_factor(&samples.all, HOUR_SECONDS, interval, cap);
    let quarter_hour = window_factor(&samples.all, QUARTER_HOUR_SECONDS, interval, cap);

    let since_algorithm = match last.timestamp {
        Some(ts) => {
            let since = tip_timestamp.saturating_sub(ts) as f64 + interval;
            cap_adjustment(since / (interval * algos), cap)
        }
        None => 1.0,
    };

    let adjustment =
        (all_time + algorithm_factor + day + hour + quarter_hour + since_algorithm) / 6.0;
    (adjustment, average)
}

/// Required target for the next `algorithm_name` block after `tip`
///
/// Returns the compact target and the adjustment applied to the previous
/// target of that algorithm. When `log` is set, worker 0 emits a debug
/// line describing the retarget.
pub fn calc_next_required_difficulty(
    params: &Params,
    index: &BlockIndex,
    tip: NodeId,
    algorithm_name: &str,
    worker_id: u32,
    log: bool,
) -> Result<(u32, f64), ChainError> {
    let tip_node = index.node(tip);
    let next_height = tip_node.height + 1;
    let fork_index = params.hard_fork_index(next_height);
    let fork = &params.hard_forks[fork_index];
    let algorithm = fork
        .algorithm_by_name(algorithm_name)
        .ok_or_else(|| ChainError::UnknownAlgorithm {
            name: algorithm_name.to_string(),
            height: next_height,
        })?;
    let key = AlgorithmKey {
        fork: fork_index,
        version: algorithm.version,
    };

    let samples = collect_samples(params, index, tip, fork, key);
    let last = match samples.last {
        Some(id) => LastBlock {
            bits: index.node(id).bits,
            timestamp: Some(index.node(id).timestamp),
        },
        None => LastBlock {
            bits: algorithm.pow_limit_bits,
            timestamp: None,
        },
    };

    let (adjustment, average) = match fork.strategy {
        RetargetStrategy::Plan9 => plan9_adjustment(fork, algorithm, &samples),
        RetargetStrategy::Blended => {
            blended_adjustment(fork, algorithm, &samples, tip_node.timestamp, last)
        }
    };

    let last_target = compact_to_big(last.bits).ok_or(ChainError::InvalidTarget(last.bits))?;
    let algorithm_limit = compact_to_big(algorithm.pow_limit_bits)
        .ok_or(ChainError::InvalidTarget(algorithm.pow_limit_bits))?;
    // past the network limit keeps the previous target, past the
    // algorithm floor (which may be harder) settles on the floor
    let new_bits = match scale_target(last_target, adjustment) {
        Some(new_target) if new_target >= params.pow_limit => last.bits,
        Some(new_target) if new_target > algorithm_limit => algorithm.pow_limit_bits,
        Some(new_target) => big_to_compact(new_target),
        None => last.bits,
    };

    if log && worker_id == 0 {
        let (factor, direction) = if adjustment > 1.0 {
            (adjustment, "<-")
        } else if adjustment < 1.0 {
            (1.0 / adjustment, "->")
        } else {
            (1.0, "--")
        };
        debug!(
            "{:<9} av {:>7.1} {:>9.4} {} {:08x} {:08x}",
            algorithm.name, average, factor, direction, last.bits, new_bits
        );
    }

    Ok((new_bits, adjustment))
}
