//! Stand-in hypothesis generator backed by the simulated secrets
//!
//! Bit-level hypothesis generation is not part of this crate. This oracle
//! models one with a fixed evidence threshold: below `2^threshold_log2`
//! traces it cannot narrow the search, at or above it it returns the true
//! state hidden among single-bit-flip decoys, leaving the final choice to the
//! correlation verifier.

use super::*;
use crate::compression::STATE_WORDS;
use crate::leakage::Secrets;

pub struct GroundTruthOracle {
    secrets: Secrets,
    threshold_log2: u32,
    decoys: usize,
}

impl GroundTruthOracle {
    pub fn new(secrets: Secrets, threshold_log2: u32, decoys: usize) -> Self {
        Self {
            secrets,
            threshold_log2,
            decoys,
        }
    }

    pub fn threshold(&self) -> usize {
        1usize << self.threshold_log2
    }

    fn decoy(variant: Variant, truth: &HashState, n: usize) -> HashState {
        let bits = variant.bits() as usize;
        let word = n % STATE_WORDS;
        let bit = (n / STATE_WORDS * 7 + 3) % bits;
        let mut words = truth.0;
        words[word] ^= 1 << bit;
        HashState(words)
    }
}

impl HypothesisOracle for GroundTruthOracle {
    fn name(&self) -> &'static str {
        "ground-truth"
    }

    fn attempt(&self, request: &OracleRequest<'_>) -> Result<Hypotheses, Inconclusive> {
        let budget = request.budget;
        if request.data.nrows() < budget || request.traces.nrows() < budget {
            return Err(Inconclusive::new(format!(
                "budget of {budget} traces exceeds the {} collected",
                request.traces.nrows().min(request.data.nrows())
            )));
        }
        if budget < self.threshold() {
            return Err(Inconclusive::new(format!(
                "{budget} traces are below the {} needed",
                self.threshold()
            )));
        }

        let truth = match request.phase {
            Phase::Inner => self.secrets.inner,
            Phase::Outer => self.secrets.outer,
        };
        let mut candidates: Vec<HashState> = (0..self.decoys)
            .map(|n| Self::decoy(request.variant, &truth, n))
            .collect();
        let position = budget.trailing_zeros() as usize % (self.decoys + 1);
        candidates.insert(position, truth);

        let explored = (budget as u64).saturating_mul(candidates.len() as u64);
        Ok(Hypotheses::new(candidates, explored))
    }
}
