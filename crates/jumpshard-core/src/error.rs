use thiserror::Error;

/// Errors raised by the hashing functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HashError {
    /// Bucket count was zero or outside the range the algorithm supports.
    #[error("invalid bucket count {0}: must be in 1..={max}", max = crate::MAX_BUCKETS)]
    InvalidBucketCount(u64),
}
