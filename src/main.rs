//! CLI for simulated HMAC-SHA-2 correlation power analysis

use anyhow::Result;
use clap::Parser;
use hmac_cpa::attack::{AttackConfig, GroundTruthOracle, HmacAttack};
use hmac_cpa::compression::Variant;
use hmac_cpa::report::{append_csv, log_file_name, PhaseRecord, ReportRecord};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "hmac-cpa")]
#[command(about = "Recover HMAC-SHA-2 inner and outer hash states from simulated leakage")]
struct Cli {
    #[arg(
        short = 'b',
        long,
        default_value = "32",
        value_parser = clap::builder::PossibleValuesParser::new(["32", "64"]),
        help = "Bit size of words: 32 for SHA-256, 64 for SHA-512"
    )]
    bit_count: String,

    #[arg(
        short = 't',
        long = "trace-count-log2",
        default_value = "15",
        help = "Log2 of the number of traces to acquire initially"
    )]
    trace_count_log2: u32,

    #[arg(
        short = 'm',
        long = "maximal-trace-count-log2",
        default_value = "31",
        help = "Log2 of the maximal number of traces + 1"
    )]
    maximal_trace_count_log2: u32,

    #[arg(short, long, help = "Standard deviation of the Gaussian noise added to traces")]
    noise: Option<f64>,

    #[arg(short, long, help = "Hex key, zero-padded to one block (random when omitted)")]
    key: Option<String>,

    #[arg(short, long = "random-seed", help = "Seed for key and trace generation")]
    random_seed: Option<u64>,

    #[arg(short, long, help = "Provide detailed printout")]
    verbose: bool,

    #[arg(short, long, help = "Append the result to stat<noise>_<bits>.csv")]
    log: bool,

    #[arg(
        long,
        default_value = "16",
        help = "Log2 of the traces the stand-in oracle needs before it yields candidates"
    )]
    oracle_threshold_log2: u32,

    #[arg(long, default_value = "3", help = "Decoy candidates returned next to the true state")]
    decoys: usize,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(recovered) => {
            if recovered {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<bool> {
    let bits: u32 = cli.bit_count.parse()?;
    let variant = Variant::from_bits(bits)?;
    let noise = cli.noise.unwrap_or(0.0);

    let config = AttackConfig {
        variant,
        min_trace_count_log2: cli.trace_count_log2,
        max_trace_count_log2: cli.maximal_trace_count_log2,
        noise_stddev: noise,
        key: cli.key,
        seed: cli.random_seed,
    };
    let mut attack = HmacAttack::new(config)?;
    info!("Random seed {}", attack.seed());

    let oracle = GroundTruthOracle::new(attack.secrets(), cli.oracle_threshold_log2, cli.decoys);
    let report = attack.run(&oracle)?;

    if cli.log {
        let path = log_file_name(noise, bits);
        append_csv(&path, &report)?;
        info!("Result appended to {path}");
    }

    let record = ReportRecord::from_report(&report);
    println!("{}", format_output(&record, cli.json)?);

    Ok(report.success())
}

fn format_phase(output: &mut String, title: &str, phase: &PhaseRecord) {
    output.push_str(&format!("{title} hash\n"));
    output.push_str(&format!("  Status: {}\n", phase.status));
    output.push_str(&format!("  Actual IV:    {}\n", phase.actual));
    if let Some(recovered) = &phase.recovered {
        output.push_str(&format!("  Recovered IV: {}\n", recovered));
    }
    if let Some(count) = phase.trace_count {
        output.push_str(&format!("  Traces: {}\n", count));
    }
    if let Some(correlation) = phase.correlation {
        output.push_str(&format!("  Correlation: {:.3}\n", correlation));
    }
    if let Some(cost) = phase.cost {
        output.push_str(&format!("  Cost: {}\n", cost));
    }
    output.push('\n');
}

fn format_output(record: &ReportRecord, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(record)?);
    }

    let mut output = String::new();
    output.push_str(&format!("{} HMAC, seed {}\n", record.hash, record.seed));
    output.push_str(&format!("Key: {}\n\n", record.key));

    format_phase(&mut output, "Inner", &record.inner);
    match &record.outer {
        Some(outer) => format_phase(&mut output, "Outer", outer),
        None => output.push_str("Outer hash not attacked.\n\n"),
    }

    if record.success {
        output.push_str(&format!(
            "Attack succeeded in {:.3} sec.\n",
            record.total_secs
        ));
    } else {
        output.push_str("Attack failed.\n");
    }

    Ok(output)
}
