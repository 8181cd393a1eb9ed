//! Difficulty adjustment arithmetic
//!
//! Pure functions with no side effects. The graph walks that gather the
//! timestamp series live in `chain::retarget`; everything here works on
//! plain numbers so it can be checked in isolation.

use primitive_types::{U256, U512};

use crate::consensus::{big_to_compact, compact_to_big};
use crate::params::Params;

/// Age (in samples) of the moving average
const EWMA_AVERAGE_AGE: f64 = 30.0;

/// Exponentially weighted moving average
///
/// The first non-zero sample seeds the average; later samples are blended
/// in with a fixed decay of 2 / (age + 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ewma {
    value: f64,
}

impl Ewma {
    const DECAY: f64 = 2.0 / (EWMA_AVERAGE_AGE + 1.0);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: f64) {
        if self.value == 0.0 {
            self.value = sample;
        } else {
            self.value = sample * Self::DECAY + self.value * (1.0 - Self::DECAY);
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Intervals between consecutive timestamps of a newest-first series
///
/// A timestamp older than its successor counts as a zero interval.
pub fn intervals(stamps: &[u64]) -> Vec<u64> {
    stamps
        .windows(2)
        .map(|pair| pair[0].saturating_sub(pair[1]))
        .collect()
}

/// EWMA of the intervals of a newest-first series
pub fn ewma_interval(stamps: &[u64]) -> f64 {
    let mut average = Ewma::new();
    for interval in intervals(stamps) {
        average.add(interval as f64);
    }
    average.value()
}

/// Arithmetic mean of the intervals of a newest-first series
pub fn mean_interval(stamps: &[u64]) -> Option<f64> {
    let intervals = intervals(stamps);
    if intervals.is_empty() {
        return None;
    }
    Some(intervals.iter().sum::<u64>() as f64 / intervals.len() as f64)
}

/// Clamp an adjustment factor into [1/cap, cap]
///
/// Non-finite factors are treated as neutral.
pub fn cap_adjustment(adjustment: f64, cap: f64) -> f64 {
    if !adjustment.is_finite() {
        return 1.0;
    }
    adjustment.clamp(1.0 / cap, cap)
}

/// Multiply a target by a floating point factor
///
/// Reproduces a 53-bit binary float multiply: the exact product is rounded
/// to 53 significant bits (ties to even) and then truncated to an integer.
/// Returns `None` for non-positive or non-finite factors and for results
/// that do not fit in 256 bits.
pub fn scale_target(target: U256, adjustment: f64) -> Option<U256> {
    if !adjustment.is_finite() || adjustment <= 0.0 {
        return None;
    }

    let raw = adjustment.to_bits();
    let biased_exponent = ((raw >> 52) & 0x7ff) as i64;
    let fraction = raw & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if biased_exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased_exponent - 1075)
    };

    let mut product = U512::from(target) * U512::from(mantissa);
    if product.is_zero() {
        return Some(U256::zero());
    }

    let bits = product.bits();
    if bits > 53 {
        let shift = bits - 53;
        let mut kept = product >> shift;
        let remainder = product - (kept << shift);
        let half = U512::one() << (shift - 1);
        if remainder > half || (remainder == half && kept.bit(0)) {
            kept = kept + U512::one();
        }
        product = kept << shift;
    }

    let scaled = if exponent >= 0 {
        let exponent = exponent as usize;
        if product.bits() + exponent > 256 {
            return None;
        }
        product << exponent
    } else {
        let exponent = (-exponent) as usize;
        if exponent >= 512 {
            U512::zero()
        } else {
            product >> exponent
        }
    };

    U256::try_from(scaled).ok()
}

/// Easiest target reachable from `bits` after `duration` seconds
///
/// Used to bound how much easier a block may claim to be relative to the
/// last checkpoint: the target may grow by the retarget adjustment factor
/// once per maximum retarget timespan elapsed.
pub fn calc_easiest_difficulty(params: &Params, bits: u32, duration: u64) -> u32 {
    if params.reduce_min_difficulty && duration > params.min_diff_reduction_time {
        return params.pow_limit_bits;
    }

    let factor = U256::from(params.retarget_adjustment_factor);
    let step = params.max_retarget_timespan().max(1);
    let mut new_target = compact_to_big(bits).unwrap_or(params.pow_limit);
    let mut remaining = duration;
    while remaining > 0 && new_target < params.pow_limit {
        new_target = new_target.saturating_mul(factor);
        remaining = remaining.saturating_sub(step);
    }

    big_to_compact(new_target.min(params.pow_limit))
}
