//! Hypothesis generation seam and the two-phase HMAC attack

use crate::compression::{HashState, Variant};
use ndarray::ArrayView2;
use serde::Serialize;
use std::fmt;

pub mod ground_truth;
pub mod hmac;
pub mod verify;

pub use ground_truth::GroundTruthOracle;
pub use hmac::{AttackConfig, AttackReport, HmacAttack, PhaseOutcome};
pub use verify::{CorrelationVerifier, Verdict};

/// Which HMAC compression call is under attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inner,
    Outer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Inner => f.write_str("inner"),
            Phase::Outer => f.write_str("outer"),
        }
    }
}

/// Evidence handed to an oracle for one attempt.
///
/// `data` and `traces` hold the whole cumulative pool for the phase; only the
/// first `budget` rows are meant to be used. Inner-phase data rows are the two
/// message words, outer-phase rows are the 16-word outer input blocks.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub variant: Variant,
    pub phase: Phase,
    pub data: ArrayView2<'a, u64>,
    pub traces: ArrayView2<'a, f64>,
    pub budget: usize,
}

const COST_OFFSET_BITS: u32 = 4;

/// Candidate hash states consistent with the leakage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypotheses {
    pub candidates: Vec<HashState>,
    /// Partial hypotheses examined while narrowing down the candidates.
    pub explored: u64,
}

impl Hypotheses {
    pub fn new(candidates: Vec<HashState>, explored: u64) -> Self {
        Self {
            candidates,
            explored,
        }
    }

    /// Bit length of `explored` less four, reported as the disambiguation
    /// cost. Up to 15 explored hypotheses cost nothing.
    pub fn cost(&self) -> u32 {
        (u64::BITS - self.explored.leading_zeros()).saturating_sub(COST_OFFSET_BITS)
    }
}

/// Not enough evidence at this budget to form a workable candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconclusive {
    pub reason: String,
}

impl Inconclusive {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Inconclusive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Turns traces into candidate hash states. Must be deterministic.
pub trait HypothesisOracle: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self, request: &OracleRequest<'_>) -> Result<Hypotheses, Inconclusive>;
}

impl<F> HypothesisOracle for F
where
    F: Fn(&OracleRequest<'_>) -> Result<Hypotheses, Inconclusive> + Send + Sync,
{
    fn name(&self) -> &'static str {
        "function"
    }

    fn attempt(&self, request: &OracleRequest<'_>) -> Result<Hypotheses, Inconclusive> {
        self(request)
    }
}
