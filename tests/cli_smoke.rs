//! End-to-end smoke tests for the instats binary

use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn instats() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("instats").unwrap()
}

#[test]
fn test_cli_help() {
    instats()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_requires_inputs() {
    instats().assert().failure();
}

#[test]
fn test_missing_input_fails_fast() {
    let dir = TempDir::new().unwrap();
    instats()
        .arg("-o")
        .arg(dir.path().join("stats.db"))
        .arg("/nonexistent/binary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_malformed_exclude_pattern_fails_fast() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input");
    fs::write(&input, b"x").unwrap();

    instats()
        .arg("-e")
        .arg("([unclosed")
        .arg("-o")
        .arg(dir.path().join("stats.db"))
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--exclude"));
}

#[test]
fn test_non_object_input_is_not_fatal_for_the_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("garbage");
    fs::write(&input, b"not an object file").unwrap();

    // Per-input failures are reported; the run itself completes.
    instats()
        .arg("-o")
        .arg(dir.path().join("stats.db"))
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to process"));
}

#[test]
fn test_excluded_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("skipme");
    fs::write(&input, b"x").unwrap();

    instats()
        .arg("-E")
        .arg("skipme")
        .arg("-o")
        .arg(dir.path().join("stats.db"))
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Skipping file"));
}
