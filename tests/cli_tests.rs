//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the signalhub binary, isolated from any config file
/// or environment of the machine running the tests
fn relay_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("signalhub").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"))
        .env_remove("SIGNALHUB_CONFIG")
        .env_remove("SIGNALHUB_REDIS_URL")
        .env_remove("SIGNALHUB_BIND")
        .env_remove("SIGNALHUB_PORT")
        .env_remove("SIGNALHUB_LOG_LEVEL");
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("signaling relay"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("signalhub"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Protocol"))
        .stdout(predicate::str::contains("Git Hash"));
}

#[test]
fn test_short_version_flag() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("signalhub"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("[directory]"))
        .stdout(predicate::str::contains("[relay]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_validate_default() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_fixture() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["config", "validate", "--config"])
        .arg(common::valid_config_fixture())
        .assert()
        .success();
}

#[test]
fn test_config_validate_invalid_fixture() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["config", "validate", "--config"])
        .arg(common::invalid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("queue_low_water"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["config", "validate", "--config", "/nonexistent/signalhub.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_init_writes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("relay.toml");

    relay_cmd(&dir)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("relay.toml"));
    assert!(path.exists());

    // refuses to overwrite without --force
    relay_cmd(&dir)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .failure();

    relay_cmd(&dir)
        .args(["config", "init", "--force", "--path"])
        .arg(&path)
        .assert()
        .success();

    relay_cmd(&dir)
        .args(["config", "validate", "--config"])
        .arg(&path)
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_run_with_missing_config() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .args(["run", "--config", "/nonexistent/signalhub.toml"])
        .assert()
        .failure()
        .code(10);
}

#[test]
fn test_run_with_unbindable_address() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("signalhub.toml");
    std::fs::write(&config, "[server]\nbind = [\"203.0.113.1:1\"]\n").unwrap();

    relay_cmd(&dir)
        .args(["-q", "run", "--config"])
        .arg(&config)
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .code(90);
}

// ─────────────────────────────────────────────────────────────────
// Argument Errors
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir)
        .arg("serve-forever")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_missing_subcommand() {
    let dir = TempDir::new().unwrap();
    relay_cmd(&dir).assert().failure();
}
