//! Compact target encoding
//!
//! A 256-bit target is stored in 32 bits: one exponent byte (the length of
//! the number in bytes) and a 3-byte mantissa whose top bit is a sign bit.
//! Every node must decode and encode these identically, so the rounding
//! and sign handling below follow the historical format exactly.

use primitive_types::U256;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Decode a compact target
///
/// Returns `None` for negative targets and for encodings whose value does
/// not fit in 256 bits. A negative zero decodes to zero.
pub fn compact_to_big(compact: u32) -> Option<U256> {
    let mut mantissa = compact & MANTISSA_MASK;
    let negative = compact & SIGN_BIT != 0;
    let exponent = (compact >> 24) as usize;

    let value = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        U256::from(mantissa)
    } else if mantissa == 0 {
        U256::zero()
    } else {
        let shift = 8 * (exponent - 3);
        let mantissa_bits = 32 - mantissa.leading_zeros() as usize;
        if mantissa_bits + shift > 256 {
            return None;
        }
        U256::from(mantissa) << shift
    };

    if negative && !value.is_zero() {
        return None;
    }
    Some(value)
}

/// Encode a target in compact form
///
/// Only the three most significant bytes survive. When the top mantissa bit
/// would read as a sign bit the mantissa is shifted down a byte instead.
pub fn big_to_compact(n: U256) -> u32 {
    if n.is_zero() {
        return 0;
    }

    let mut exponent = (n.bits() + 7) / 8;
    let mut mantissa = if exponent <= 3 {
        (n.low_u64() as u32) << (8 * (3 - exponent))
    } else {
        (n >> (8 * (exponent - 3))).low_u64() as u32
    };

    if mantissa & SIGN_BIT != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    ((exponent as u32) << 24) | mantissa
}

/// Expected number of hashes needed to meet a target: 2^256 / (target + 1)
///
/// Invalid or zero targets carry no work.
pub fn calc_work(bits: u32) -> U256 {
    let target = match compact_to_big(bits) {
        Some(target) if !target.is_zero() => target,
        _ => return U256::zero(),
    };
    if target == U256::MAX {
        return U256::one();
    }
    // 2^256 does not fit, so use (2^256 - target - 1) / (target + 1) + 1
    (!target / (target + U256::one())) + U256::one()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_to_big_vectors() {
        assert_eq!(compact_to_big(0x1d00ffff), Some(U256::from(0xffffu64) << 208));
        assert_eq!(compact_to_big(0x01003456), Some(U256::zero()));
        assert_eq!(compact_to_big(0x01123456), Some(U256::from(0x12u64)));
        assert_eq!(compact_to_big(0x02008000), Some(U256::from(0x80u64)));
        assert_eq!(compact_to_big(0x05009234), Some(U256::from(0x9234_0000u64)));
        assert_eq!(compact_to_big(0x04123456), Some(U256::from(0x1234_5600u64)));
        assert_eq!(compact_to_big(0x00000000), Some(U256::zero()));
    }

    #[test]
    fn test_negative_and_overflow() {
        assert_eq!(compact_to_big(0x04923456), None);
        // negative zero is still zero
        assert_eq!(compact_to_big(0x01803456), Some(U256::zero()));
        assert_eq!(compact_to_big(0xff123456), None);
        assert_eq!(compact_to_big(0x2100ffff), Some(U256::from(0xffffu64) << 240));
        assert_eq!(compact_to_big(0x21010000), None);
    }

    #[test]
    fn test_big_to_compact_vectors() {
        assert_eq!(big_to_compact(U256::zero()), 0);
        assert_eq!(big_to_compact(U256::from(0x12u64)), 0x01120000);
        assert_eq!(big_to_compact(U256::from(0x80u64)), 0x02008000);
        assert_eq!(big_to_compact(U256::from(0x1234_5600u64)), 0x04123456);
        assert_eq!(big_to_compact(U256::from(0xffffu64) << 208), 0x1d00ffff);
    }

    #[test]
    fn test_round_trip_small_values_exact() {
        for value in [1u64, 0x7f, 0x80, 0xffff, 0x7f_ffff] {
            let n = U256::from(value);
            assert_eq!(compact_to_big(big_to_compact(n)), Some(n));
        }
    }

    #[test]
    fn test_calc_work() {
        // the classic 0x1d00ffff target needs 0x100010001 hashes
        assert_eq!(calc_work(0x1d00ffff), U256::from(0x1_0001_0001u64));
        assert!(calc_work(0x1c00ffff) > calc_work(0x1d00ffff));
        assert_eq!(calc_work(0), U256::zero());
        assert_eq!(calc_work(0x04923456), U256::zero());
    }
}
