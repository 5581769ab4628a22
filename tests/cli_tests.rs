// Binary-level behavior of the stackctl CLI

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn stackctl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stackctl").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("diagnose"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_diagnose_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir)
        .args(["diagnose", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--quiet"))
        .stdout(predicate::str::contains("--no-auto-start"))
        .stdout(predicate::str::contains("--quick"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--fix"));
}

#[test]
fn test_diagnose_without_deployment_exits_fatally() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir)
        .arg("diagnose")
        .assert()
        .code(100)
        .stderr(predicate::str::contains("config.json"))
        .stderr(predicate::str::contains("setup"));
}

#[test]
fn test_status_without_deployment_fails() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("setup"));
}

#[test]
fn test_unknown_flag_is_rejected() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir).args(["diagnose", "--format", "yaml"]).assert().failure();
}

#[test]
fn test_json_output_rejects_fix() {
    let dir = TempDir::new().unwrap();
    stackctl(&dir)
        .args(["diagnose", "--json", "--fix"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--fix"));
}
