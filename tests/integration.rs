//! Integration tests for hmac-cpa CLI

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    Command::cargo_bin("hmac-cpa").unwrap()
}

#[test]
fn test_attack_recovers_both_states() {
    cli()
        .args(["-t", "6", "-m", "10", "--oracle-threshold-log2", "7", "-r", "1"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Inner hash"))
        .stdout(predicate::str::contains("Outer hash"))
        .stdout(predicate::str::contains("Attack succeeded"))
        .stderr(predicate::str::contains("Trying 64 traces"))
        .stderr(predicate::str::contains("Trying 128 traces"));
}

#[test]
fn test_zero_key_first_round() {
    cli()
        .args(["-k", "00", "-t", "10", "-m", "12", "--oracle-threshold-log2", "10"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Traces: 1024"))
        .stdout(predicate::str::contains("Key: 00000000 00000000"));
}

#[test]
fn test_sha512_with_noise() {
    cli()
        .args([
            "-b", "64", "-n", "1.5", "-t", "4", "-m", "8", "--oracle-threshold-log2", "5", "-r",
            "3",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("SHA-512"));
}

#[test]
fn test_ceiling_exhausted_exit_code() {
    cli()
        .args(["-t", "4", "-m", "6", "--oracle-threshold-log2", "20", "-r", "2"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Attack failed"))
        .stdout(predicate::str::contains("ceiling-exhausted"))
        .stdout(predicate::str::contains("Outer hash not attacked"));
}

#[test]
fn test_json_output_schema() {
    let output = cli()
        .args(["--json", "-t", "5", "-m", "8", "--oracle-threshold-log2", "6", "-r", "9"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");

    assert_eq!(json["seed"].as_u64(), Some(9));
    assert_eq!(json["bits"].as_u64(), Some(32));
    assert_eq!(json["success"].as_bool(), Some(true));
    assert_eq!(json["inner"]["round_log2"].as_u64(), Some(6));
    assert_eq!(json["inner"]["recovered"], json["inner"]["actual"]);
    assert_eq!(json["outer"]["recovered"], json["outer"]["actual"]);
    assert!(json["inner"]["correlation"].is_f64());
    assert!(json["total_secs"].is_f64());

    let rounds = json["rounds"].as_array().unwrap();
    assert_eq!(rounds.len(), 2);
    assert!(rounds[0]["inner_secs"].is_f64());

    let attempts = json["inner"]["attempts"].as_array().unwrap();
    assert_eq!(attempts[0]["success"].as_bool(), Some(false));
    assert_eq!(attempts[1]["trace_count"].as_u64(), Some(64));
}

#[test]
fn test_same_seed_same_key() {
    let run = || {
        let output = cli()
            .args(["--json", "-t", "4", "-m", "7", "--oracle-threshold-log2", "5", "-r", "77"])
            .output()
            .unwrap();
        serde_json::from_slice::<serde_json::Value>(&output.stdout).unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a["key"], b["key"]);
    assert_eq!(a["outer"]["recovered"], b["outer"]["recovered"]);
}

#[test]
fn test_log_appends_csv_row() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        cli()
            .current_dir(dir.path())
            .args(["-l", "-t", "4", "-m", "7", "--oracle-threshold-log2", "5", "-r", "12"])
            .assert()
            .code(0);
    }

    let content = std::fs::read_to_string(dir.path().join("stat0_32.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("12,Success,5,5,"));
}

#[test]
fn test_invalid_key_error_exit() {
    cli()
        .args(["-k", "not-hex", "-t", "4", "-m", "6"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid key"));
}

#[test]
fn test_invalid_trace_range_error_exit() {
    cli()
        .args(["-t", "10", "-m", "10"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid trace count range"));
}

#[test]
fn test_unsupported_bit_count_rejected() {
    cli().args(["-b", "16"]).assert().failure();
}
