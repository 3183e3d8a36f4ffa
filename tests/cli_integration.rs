//! Integration tests for the Sentinel CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the sentinel binary
fn sentinel() -> Command {
    Command::new(cargo::cargo_bin!("sentinel"))
}

/// A temp dir configured with a file-backed incident store.
fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("sentinel.json"),
        r#"{"store_path": "incidents.json"}"#,
    )
    .unwrap();
    temp
}

#[test]
fn test_help() {
    sentinel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Self-healing SRE agent"));
}

#[test]
fn test_version() {
    sentinel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_inject_and_list() {
    let temp = workspace();

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("inject")
        .arg("Checkout latency")
        .arg("-m")
        .arg("p99 spiked after the last deploy")
        .arg("--severity")
        .arg("high")
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued:"));

    assert!(temp.path().join("incidents.json").exists());

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Checkout latency"))
        .stdout(predicate::str::contains("queued"));
}

#[test]
fn test_list_empty_queue() {
    let temp = workspace();

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("no incidents"));
}

#[test]
fn test_show_unknown_incident_fails() {
    let temp = workspace();

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("show")
        .arg("nonexistent-id")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown incident"));
}

#[test]
fn test_malformed_config_fails_loudly() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("sentinel.json"), "{not json").unwrap();

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_config_value_fails_loudly() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("sentinel.json"), r#"{"max_iterations": 0}"#).unwrap();

    sentinel()
        .arg("--dir")
        .arg(temp.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_iterations"));
}
