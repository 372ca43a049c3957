//! Serializable attack results and CSV statistics logging

use crate::attack::hmac::{AttackReport, PhaseOutcome, PhaseResult};
use crate::attack::Phase;
use anyhow::Result;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct ReportRecord {
    pub seed: u64,
    pub hash: String,
    pub bits: u32,
    pub key: String,
    pub noise: f64,
    pub success: bool,
    pub inner: PhaseRecord,
    pub outer: Option<PhaseRecord>,
    pub total_secs: f64,
    pub rounds: Vec<RoundTiming>,
}

#[derive(Debug, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: String,
    pub round_log2: Option<u32>,
    pub trace_count: Option<usize>,
    pub cost: Option<u32>,
    pub correlation: Option<f64>,
    pub recovered: Option<String>,
    pub actual: String,
    pub attempts: Vec<AttemptOutput>,
}

#[derive(Debug, Serialize)]
pub struct AttemptOutput {
    pub trace_count_log2: u32,
    pub trace_count: usize,
    pub elapsed_secs: f64,
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoundTiming {
    pub inner_secs: Option<f64>,
    pub outer_secs: Option<f64>,
}

impl ReportRecord {
    pub fn from_report(report: &AttackReport) -> Self {
        let variant = report.variant;
        let phase_record = |result: &PhaseResult| {
            let actual = match result.phase {
                Phase::Inner => report.secrets.inner,
                Phase::Outer => report.secrets.outer,
            };
            let (status, correlation) = match &result.outcome {
                PhaseOutcome::Accepted { correlation, .. } => ("recovered", Some(*correlation)),
                PhaseOutcome::CeilingExhausted => ("ceiling-exhausted", None),
            };
            PhaseRecord {
                phase: result.phase,
                status: status.to_string(),
                round_log2: result.round_log2(),
                trace_count: result.round_log2().map(|r| 1usize << r),
                cost: result.cost(),
                correlation,
                recovered: result.secret().map(|s| s.to_hex(variant)),
                actual: actual.to_hex(variant),
                attempts: result
                    .attempts
                    .iter()
                    .map(|a| AttemptOutput {
                        trace_count_log2: a.trace_count_log2,
                        trace_count: a.trace_count(),
                        elapsed_secs: a.elapsed.as_secs_f64(),
                        success: a.success(),
                        reason: a.reason.clone(),
                    })
                    .collect(),
            }
        };

        ReportRecord {
            seed: report.seed,
            hash: variant.name().to_string(),
            bits: variant.bits(),
            key: report.key.to_hex(),
            noise: report.noise_stddev,
            success: report.success(),
            inner: phase_record(&report.inner),
            outer: report.outer.as_ref().map(phase_record),
            total_secs: report.total_time().as_secs_f64(),
            rounds: report
                .round_timings()
                .into_iter()
                .map(|(inner, outer)| RoundTiming {
                    inner_secs: inner.map(|d| d.as_secs_f64()),
                    outer_secs: outer.map(|d| d.as_secs_f64()),
                })
                .collect(),
        }
    }
}

/// `stat{noise}_{bits}.csv`, with the noise truncated to an integer.
pub fn log_file_name(noise: f64, bits: u32) -> String {
    format!("stat{}_{}.csv", noise.trunc() as i64, bits)
}

fn secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One statistics row: seed, outcome, round exponents, costs, total time,
/// then the per-round (inner, outer) timing pairs.
pub fn csv_row(report: &AttackReport) -> Vec<String> {
    let outer = report.outer.as_ref();
    let mut row = vec![
        report.seed.to_string(),
        if report.success() { "Success" } else { "Failure" }.to_string(),
        opt(report.inner.round_log2()),
        opt(outer.and_then(|o| o.round_log2())),
        opt(report.inner.cost()),
        opt(outer.and_then(|o| o.cost())),
        secs(report.total_time()),
    ];
    for (inner, outer) in report.round_timings() {
        row.push(inner.map(secs).unwrap_or_default());
        row.push(outer.map(secs).unwrap_or_default());
    }
    row
}

/// Appends one statistics row to `path`, creating the file if needed.
pub fn append_csv<P: AsRef<Path>>(path: P, report: &AttackReport) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_writer(file);
    writer.write_record(csv_row(report))?;
    writer.flush()?;
    Ok(())
}
