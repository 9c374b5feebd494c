//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the magellan-executor binary
fn executor_cmd() -> Command {
    Command::cargo_bin("magellan-executor").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    executor_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Magellan Executor"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    executor_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("magellan-executor"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    executor_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("magellan-executor"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    executor_cmd()
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[executor]"))
        .stdout(predicate::str::contains("[scheduler]"))
        .stdout(predicate::str::contains("[provisioning]"));
}

#[test]
fn test_config_validate_missing_file() {
    executor_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/executor.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_init_creates_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("executor.toml");

    executor_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file created"));

    assert!(path.exists());

    // A second init without --force refuses to overwrite.
    executor_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    // With --force it succeeds.
    executor_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn test_unknown_command_fails() {
    executor_cmd()
        .arg("annihilate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
