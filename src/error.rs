//! Error types for attack configuration and consistency checks

use crate::attack::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttackError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key has {len} hex digits, a {bits}-bit block holds at most {max}")]
    KeyTooLong { len: usize, max: usize, bits: u32 },

    #[error("Unsupported word width: {0} bits (expected 32 or 64)")]
    UnsupportedWordWidth(u32),

    #[error("Invalid trace count range: 2^{min_log2} .. 2^{max_log2}")]
    InvalidTraceRange { min_log2: u32, max_log2: u32 },

    #[error("Invalid noise standard deviation: {0}")]
    InvalidNoise(f64),

    #[error("Trace set has no outer-hash traces")]
    IncompleteTraceSet,

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("Verified {phase} hash state {found} does not match the simulated secret {expected}")]
    VerificationMismatch {
        phase: Phase,
        expected: String,
        found: String,
    },
}
