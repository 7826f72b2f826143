//! CLI integration tests
//!
//! Tests the vmgate CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn vmgate() -> Command {
    Command::cargo_bin("vmgate")
        .expect("Failed to locate vmgate binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    vmgate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("vmgate"))
        .stdout(predicate::str::contains("Hypervisor cluster coordination client"));
}

#[test]
fn test_cli_version() {
    vmgate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vmgate"));
}

#[test]
fn test_cli_task_help() {
    vmgate()
        .args(["task", "log", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--follow"));
}

#[test]
fn test_cli_sync_help() {
    vmgate()
        .args(["sync", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("retry"));
}

#[test]
fn test_cli_console_requires_node() {
    vmgate()
        .args(["console", "--cluster", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--node"));
}

#[test]
fn test_cli_rejects_unknown_sync_status() {
    vmgate()
        .args(["sync", "list", "--status", "exploded"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exploded"));
}

#[test]
fn test_cli_config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    vmgate()
        .arg("--config")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_show_renders_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "http_bind = \"127.0.0.1:9999\"\n").unwrap();
    vmgate()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:9999"))
        .stdout(predicate::str::contains("console_token_ttl = 120"));
}

#[test]
fn test_cli_without_token_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "token_path = \"{}\"\n",
            dir.path().join("missing_token").display()
        ),
    )
    .unwrap();
    vmgate()
        .arg("--config")
        .arg(&path)
        .arg("health")
        .assert()
        .failure()
        .stderr(predicate::str::contains("API token"));
}

#[test]
fn test_cli_config_init_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    vmgate()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("console_token_ttl = 120"), "{}", written);
}
