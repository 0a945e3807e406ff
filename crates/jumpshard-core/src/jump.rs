//! Jump Consistent Hashing
//!
//! Lamping & Veach, "A Fast, Minimal Memory, Consistent Hash Algorithm".
//! Reference: https://arxiv.org/abs/1406.2294
//!
//! Properties:
//! - Deterministic: same (key, buckets) always yields the same bucket
//! - Minimal disruption: growing from n to n+1 buckets moves ~1/(n+1) of keys,
//!   and every moved key lands in the new bucket n
//! - Even distribution with no lookup table or per-node state

use crate::HashError;

/// Largest supported bucket count.
///
/// The floating-point step divides `2^31`, so buckets beyond `i32::MAX`
/// are outside the domain the algorithm is defined on.
pub const MAX_BUCKETS: u32 = i32::MAX as u32;

/// Multiplier of the 64-bit linear congruential generator seeded by the key.
const LCG_MULTIPLIER: u64 = 2_862_933_555_777_941_757;

/// Map `key` onto a bucket in `0..buckets`.
///
/// Fails with [`HashError::InvalidBucketCount`] when `buckets` is zero or
/// larger than [`MAX_BUCKETS`].
pub fn jump_hash(key: u64, buckets: u32) -> Result<u32, HashError> {
    if buckets == 0 || buckets > MAX_BUCKETS {
        return Err(HashError::InvalidBucketCount(u64::from(buckets)));
    }

    let mut key = key;
    let mut b: i64 = -1;
    let mut j: i64 = 0;

    while j < i64::from(buckets) {
        b = j;
        key = key.wrapping_mul(LCG_MULTIPLIER).wrapping_add(1);
        j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }

    // b is in [0, buckets) once the loop has run at least once
    Ok(b as u32)
}
