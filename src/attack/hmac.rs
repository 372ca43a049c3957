//! Two-phase HMAC attack with escalating trace budgets
//!
//! The inner phase recovers the inner hash state from the leakage of the
//! first HMAC compression. Once that state is verified, the outer phase
//! rebuilds the outer compression input from it and recovers the outer state
//! the same way. Each phase doubles its trace budget after every inconclusive
//! round until the configured ceiling.

use super::*;
use crate::error::AttackError;
use crate::key::Key;
use crate::leakage::{LeakageSimulator, Secrets, TracePool, TraceSet, BULK_TRACE_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Largest accepted trace-count exponent.
pub const MAX_TRACE_COUNT_LOG2: u32 = 40;

#[derive(Debug, Clone)]
pub struct AttackConfig {
    pub variant: Variant,
    /// Log2 of the first trace budget.
    pub min_trace_count_log2: u32,
    /// Exclusive upper bound on the budget exponent.
    pub max_trace_count_log2: u32,
    pub noise_stddev: f64,
    /// Hex key. Drawn at random when absent.
    pub key: Option<String>,
    /// Seed for key and trace generation. Drawn from the OS when absent.
    pub seed: Option<u64>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Sha256,
            min_trace_count_log2: 15,
            max_trace_count_log2: 31,
            noise_stddev: 0.0,
            key: None,
            seed: None,
        }
    }
}

impl AttackConfig {
    pub fn validate(&self) -> Result<(), AttackError> {
        let (min_log2, max_log2) = (self.min_trace_count_log2, self.max_trace_count_log2);
        if min_log2 >= max_log2 || max_log2 > MAX_TRACE_COUNT_LOG2 {
            return Err(AttackError::InvalidTraceRange { min_log2, max_log2 });
        }
        if !self.noise_stddev.is_finite() || self.noise_stddev < 0.0 {
            return Err(AttackError::InvalidNoise(self.noise_stddev));
        }
        Ok(())
    }
}

/// Bookkeeping for one escalation round.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub phase: Phase,
    pub trace_count_log2: u32,
    pub elapsed: Duration,
    pub secret: Option<HashState>,
    /// Why the round did not produce a secret.
    pub reason: Option<String>,
}

impl AttemptRecord {
    pub fn success(&self) -> bool {
        self.secret.is_some()
    }

    pub fn trace_count(&self) -> usize {
        1usize << self.trace_count_log2
    }
}

/// Terminal state of one phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Accepted {
        secret: HashState,
        round_log2: u32,
        /// Bit length of the oracle's explored hypothesis count.
        cost: u32,
        correlation: f64,
    },
    CeilingExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub phase: Phase,
    pub outcome: PhaseOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl PhaseResult {
    pub fn secret(&self) -> Option<HashState> {
        match &self.outcome {
            PhaseOutcome::Accepted { secret, .. } => Some(*secret),
            PhaseOutcome::CeilingExhausted => None,
        }
    }

    pub fn round_log2(&self) -> Option<u32> {
        match &self.outcome {
            PhaseOutcome::Accepted { round_log2, .. } => Some(*round_log2),
            PhaseOutcome::CeilingExhausted => None,
        }
    }

    pub fn cost(&self) -> Option<u32> {
        match &self.outcome {
            PhaseOutcome::Accepted { cost, .. } => Some(*cost),
            PhaseOutcome::CeilingExhausted => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.attempts.iter().map(|a| a.elapsed).sum()
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct AttackReport {
    pub seed: u64,
    pub variant: Variant,
    pub key: Key,
    pub secrets: Secrets,
    pub noise_stddev: f64,
    /// The single full-length trace every candidate was verified against.
    pub held_out: TraceSet,
    pub inner: PhaseResult,
    /// Absent when the inner phase failed.
    pub outer: Option<PhaseResult>,
}

impl AttackReport {
    pub fn success(&self) -> bool {
        self.inner.secret().is_some() && self.outer.as_ref().and_then(|o| o.secret()).is_some()
    }

    /// Recovered (inner, outer) states, when both phases succeeded.
    pub fn recovered(&self) -> Option<(HashState, HashState)> {
        let inner = self.inner.secret()?;
        let outer = self.outer.as_ref()?.secret()?;
        Some((inner, outer))
    }

    pub fn total_time(&self) -> Duration {
        self.inner.elapsed() + self.outer.as_ref().map(|o| o.elapsed()).unwrap_or_default()
    }

    /// Per-round (inner, outer) durations, the shorter phase padded with
    /// `None`.
    pub fn round_timings(&self) -> Vec<(Option<Duration>, Option<Duration>)> {
        let inner = &self.inner.attempts;
        let outer: &[AttemptRecord] = self.outer.as_ref().map(|o| &o.attempts[..]).unwrap_or(&[]);
        (0..inner.len().max(outer.len()))
            .map(|i| (inner.get(i).map(|a| a.elapsed), outer.get(i).map(|a| a.elapsed)))
            .collect()
    }
}

enum RoundOutcome {
    Accepted { verdict: Verdict, cost: u32 },
    Inconclusive(String),
}

/// One attack run: a key, its simulated device, and a seeded generator.
pub struct HmacAttack {
    config: AttackConfig,
    seed: u64,
    key: Key,
    secrets: Secrets,
    simulator: LeakageSimulator,
    verifier: CorrelationVerifier,
    rng: StdRng,
}

impl HmacAttack {
    /// Validates the configuration and derives the key and secrets.
    ///
    /// A random key is the first thing drawn from the seeded generator.
    pub fn new(config: AttackConfig) -> Result<Self, AttackError> {
        config.validate()?;
        let variant = config.variant;
        let simulator = LeakageSimulator::new(variant, config.noise_stddev)?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        let key = match &config.key {
            Some(hex) => Key::from_hex(hex, variant)?,
            None => Key::random(&mut rng, variant),
        };
        let secrets = simulator.generate_secrets(&key);

        Ok(Self {
            config,
            seed,
            key,
            secrets,
            simulator,
            verifier: CorrelationVerifier::new(variant),
            rng,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The simulated device's inner and outer states.
    pub fn secrets(&self) -> Secrets {
        self.secrets
    }

    /// Runs the inner phase, then the outer phase if the inner one succeeded.
    ///
    /// Inconclusive rounds and an exhausted ceiling are reported in the
    /// returned [`AttackReport`]. A verified state that differs from the
    /// simulated secret is an error.
    pub fn run(&mut self, oracle: &dyn HypothesisOracle) -> Result<AttackReport, AttackError> {
        let variant = self.config.variant;
        info!("Key {}", self.key.to_hex());
        info!("Actual inner hash IV {}", self.secrets.inner.to_hex(variant));
        info!("Actual outer hash IV {}", self.secrets.outer.to_hex(variant));
        info!("Attacking with the {} oracle", oracle.name());

        info!("Collecting the traces");
        let bulk = self.collect(1usize << self.config.min_trace_count_log2);
        let mut pool = TracePool::new(bulk)?;
        let held_out = self.simulator.generate_traces(
            &self.secrets.inner,
            Some(&self.secrets.outer),
            1,
            variant.rounds(),
            &mut self.rng,
        );

        info!("Attacking the inner hash");
        let inner = self.attack_inner(oracle, &mut pool, &held_out)?;

        let outer = match inner.outcome {
            PhaseOutcome::Accepted {
                secret, round_log2, ..
            } => {
                info!("Attacking the outer hash");
                Some(self.attack_outer(oracle, &mut pool, &held_out, &secret, round_log2)?)
            }
            PhaseOutcome::CeilingExhausted => {
                info!("Inner hash failure");
                None
            }
        };

        let report = AttackReport {
            seed: self.seed,
            variant,
            key: self.key.clone(),
            secrets: self.secrets,
            noise_stddev: self.config.noise_stddev,
            held_out,
            inner,
            outer,
        };
        if report.success() {
            info!("Total attack time {:.3} sec", report.total_time().as_secs_f64());
        } else if report.outer.is_some() {
            info!("Outer hash failure");
        }
        Ok(report)
    }

    fn collect(&mut self, count: usize) -> TraceSet {
        debug!(count, "generating traces");
        self.simulator.generate_traces(
            &self.secrets.inner,
            Some(&self.secrets.outer),
            count,
            BULK_TRACE_SIZE,
            &mut self.rng,
        )
    }

    fn attack_inner(
        &mut self,
        oracle: &dyn HypothesisOracle,
        pool: &mut TracePool,
        held_out: &TraceSet,
    ) -> Result<PhaseResult, AttackError> {
        let variant = self.config.variant;
        let (min_log2, max_log2) = (self.config.min_trace_count_log2, self.config.max_trace_count_log2);
        let mut attempts = Vec::new();

        for round_log2 in min_log2..max_log2 {
            let budget = 1usize << round_log2;
            info!("Trying {budget} traces");
            let start = Instant::now();
            let request = OracleRequest {
                variant,
                phase: Phase::Inner,
                data: pool.data(),
                traces: pool.inner_traces(),
                budget,
            };
            let round = self.attempt_round(oracle, &request, held_out, held_out.inner.view(), None);
            let elapsed = start.elapsed();

            match round {
                RoundOutcome::Accepted { verdict, cost } => {
                    self.check_ground_truth(Phase::Inner, &verdict.selected)?;
                    attempts.push(AttemptRecord {
                        phase: Phase::Inner,
                        trace_count_log2: round_log2,
                        elapsed,
                        secret: Some(verdict.selected),
                        reason: None,
                    });
                    info!(
                        "{:.3} sec passed. Inner hash found successfully.",
                        elapsed.as_secs_f64()
                    );
                    return Ok(PhaseResult {
                        phase: Phase::Inner,
                        outcome: PhaseOutcome::Accepted {
                            secret: verdict.selected,
                            round_log2,
                            cost,
                            correlation: verdict.correlation,
                        },
                        attempts,
                    });
                }
                RoundOutcome::Inconclusive(reason) => {
                    info!(
                        "{:.3} sec passed. Inner hash failure: {reason}",
                        elapsed.as_secs_f64()
                    );
                    attempts.push(AttemptRecord {
                        phase: Phase::Inner,
                        trace_count_log2: round_log2,
                        elapsed,
                        secret: None,
                        reason: Some(reason),
                    });
                    if round_log2 == max_log2 - 1 {
                        break;
                    }
                    info!("Collecting more traces");
                    let more = self.collect(budget);
                    pool.append(more)?;
                    debug!(pool = pool.len(), "trace pool grown");
                }
            }
        }

        Ok(PhaseResult {
            phase: Phase::Inner,
            outcome: PhaseOutcome::CeilingExhausted,
            attempts,
        })
    }

    /// Outer rounds below `inner_round_log2` reuse traces gathered during the
    /// inner phase; later rounds collect fresh ones.
    fn attack_outer(
        &mut self,
        oracle: &dyn HypothesisOracle,
        pool: &mut TracePool,
        held_out: &TraceSet,
        inner_secret: &HashState,
        inner_round_log2: u32,
    ) -> Result<PhaseResult, AttackError> {
        let variant = self.config.variant;
        let (min_log2, max_log2) = (self.config.min_trace_count_log2, self.config.max_trace_count_log2);
        let held_out_outer = held_out.outer.as_ref().ok_or(AttackError::IncompleteTraceSet)?;
        let mut attempts = Vec::new();

        for round_log2 in min_log2..max_log2 {
            let budget = 1usize << round_log2;
            info!("Trying {budget} traces");
            let start = Instant::now();
            let blocks = self.simulator.outer_blocks(inner_secret, pool.data_prefix(budget));
            let request = OracleRequest {
                variant,
                phase: Phase::Outer,
                data: blocks.view(),
                traces: pool.outer_prefix(budget),
                budget,
            };
            let round = self.attempt_round(
                oracle,
                &request,
                held_out,
                held_out_outer.view(),
                Some(inner_secret),
            );
            let elapsed = start.elapsed();

            match round {
                RoundOutcome::Accepted { verdict, cost } => {
                    self.check_ground_truth(Phase::Outer, &verdict.selected)?;
                    attempts.push(AttemptRecord {
                        phase: Phase::Outer,
                        trace_count_log2: round_log2,
                        elapsed,
                        secret: Some(verdict.selected),
                        reason: None,
                    });
                    info!(
                        "{:.3} sec passed. Outer hash found successfully.",
                        elapsed.as_secs_f64()
                    );
                    return Ok(PhaseResult {
                        phase: Phase::Outer,
                        outcome: PhaseOutcome::Accepted {
                            secret: verdict.selected,
                            round_log2,
                            cost,
                            correlation: verdict.correlation,
                        },
                        attempts,
                    });
                }
                RoundOutcome::Inconclusive(reason) => {
                    info!(
                        "{:.3} sec passed. Outer hash failure: {reason}",
                        elapsed.as_secs_f64()
                    );
                    attempts.push(AttemptRecord {
                        phase: Phase::Outer,
                        trace_count_log2: round_log2,
                        elapsed,
                        secret: None,
                        reason: Some(reason),
                    });
                    if round_log2 == max_log2 - 1 {
                        break;
                    }
                    if round_log2 < inner_round_log2 {
                        debug!(pool = pool.len(), "reusing traces from the inner phase");
                        continue;
                    }
                    info!("Collecting more traces");
                    let more = self.collect(budget);
                    pool.append(more)?;
                    debug!(pool = pool.len(), "trace pool grown");
                }
            }
        }

        Ok(PhaseResult {
            phase: Phase::Outer,
            outcome: PhaseOutcome::CeilingExhausted,
            attempts,
        })
    }

    fn attempt_round(
        &self,
        oracle: &dyn HypothesisOracle,
        request: &OracleRequest<'_>,
        held_out: &TraceSet,
        held_out_traces: ArrayView2<f64>,
        recovered_inner: Option<&HashState>,
    ) -> RoundOutcome {
        let hypotheses = match oracle.attempt(request) {
            Ok(h) => h,
            Err(inconclusive) => return RoundOutcome::Inconclusive(inconclusive.reason),
        };
        if hypotheses.candidates.is_empty() {
            return RoundOutcome::Inconclusive("empty candidate set".to_string());
        }
        debug!(
            candidates = hypotheses.candidates.len(),
            explored = hypotheses.explored,
            "oracle produced hypotheses"
        );

        match self.verifier.verify(
            &hypotheses.candidates,
            held_out.data.view(),
            held_out_traces,
            recovered_inner,
        ) {
            Some(verdict) => RoundOutcome::Accepted {
                verdict,
                cost: hypotheses.cost(),
            },
            None => RoundOutcome::Inconclusive(
                "no candidate correlates with the held-out trace".to_string(),
            ),
        }
    }

    fn check_ground_truth(&self, phase: Phase, found: &HashState) -> Result<(), AttackError> {
        let expected = match phase {
            Phase::Inner => self.secrets.inner,
            Phase::Outer => self.secrets.outer,
        };
        if *found != expected {
            let variant = self.config.variant;
            return Err(AttackError::VerificationMismatch {
                phase,
                expected: expected.to_hex(variant),
                found: found.to_hex(variant),
            });
        }
        Ok(())
    }
}
