//! Candidate disambiguation by correlation against a held-out trace

use super::Phase;
use crate::compression::{HashState, Variant};
use crate::leakage::LeakageSimulator;
use crate::math::pearson;
use ndarray::ArrayView2;
use rayon::prelude::*;
use tracing::info;

/// Outcome of scoring a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub selected: HashState,
    pub index: usize,
    pub correlation: f64,
    /// Every candidate with its coefficient, in input order.
    pub scores: Vec<(HashState, f64)>,
}

pub struct CorrelationVerifier {
    simulator: LeakageSimulator,
}

impl CorrelationVerifier {
    pub fn new(variant: Variant) -> Self {
        Self {
            simulator: LeakageSimulator::noiseless(variant),
        }
    }

    /// Picks the candidate whose predicted leakage best matches `held_out`.
    ///
    /// `data` holds the messages behind `held_out`. With `recovered_inner`
    /// unset the candidates are inner states; otherwise they are outer states
    /// and the outer input is rebuilt from `recovered_inner`.
    ///
    /// Ties go to the earliest candidate. Candidates whose coefficient is not
    /// finite are never selected; `None` means no candidate could be scored.
    pub fn verify(
        &self,
        candidates: &[HashState],
        data: ArrayView2<u64>,
        held_out: ArrayView2<f64>,
        recovered_inner: Option<&HashState>,
    ) -> Option<Verdict> {
        let phase = if recovered_inner.is_some() {
            Phase::Outer
        } else {
            Phase::Inner
        };
        let trace_size = held_out.ncols();
        let observed: Vec<f64> = held_out.iter().copied().collect();

        let scores: Vec<(HashState, f64)> = candidates
            .par_iter()
            .map(|candidate| {
                let predicted = match recovered_inner {
                    None => self.simulator.simulate(candidate, None, data, trace_size).inner,
                    Some(inner) => match self
                        .simulator
                        .simulate(inner, Some(candidate), data, trace_size)
                        .outer
                    {
                        Some(outer) => outer,
                        None => return (*candidate, f64::NAN),
                    },
                };
                let predicted: Vec<f64> = predicted.iter().copied().collect();
                (*candidate, pearson(&predicted, &observed))
            })
            .collect();

        let variant = self.simulator.variant();
        info!("All found {phase} hash IV candidates and their correlation coefficients");
        for (candidate, corr) in &scores {
            info!("{}  {corr:6.3}", candidate.to_hex(variant));
        }

        let mut best: Option<(usize, f64)> = None;
        for (i, (_, corr)) in scores.iter().enumerate() {
            if !corr.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, max)| *corr > max) {
                best = Some((i, *corr));
            }
        }

        let (index, correlation) = best?;
        let selected = scores[index].0;
        info!("Found {phase} hash IV {}", selected.to_hex(variant));
        Some(Verdict {
            selected,
            index,
            correlation,
            scores,
        })
    }
}
