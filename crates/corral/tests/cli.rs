//! Command line surface.

use assert_cmd::Command;
use predicates::prelude::*;

fn corral(root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.env_remove("CORRAL_CONFIG")
        .env_remove("CORRAL_SYSTEMD_CGROUP")
        .env("CORRAL_ROOT", root);
    cmd
}

#[test]
fn help_lists_lifecycle_commands() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("create")
                .and(predicate::str::contains("start"))
                .and(predicate::str::contains("kill"))
                .and(predicate::str::contains("delete")),
        );
}

#[test]
fn completion_script() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("corral"));
}

#[test]
fn empty_root_lists_nothing() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .args(["list", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    corral(root.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("STATUS"));
}

#[test]
fn state_of_unknown_container_fails() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .args(["state", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn delete_of_unknown_container_succeeds() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path()).args(["delete", "ghost"]).assert().success();
    corral(root.path())
        .args(["delete", "--force", "ghost"])
        .assert()
        .success();
}

#[test]
fn invalid_arguments_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .args(["kill", "web", "SIGBOGUS"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown signal"));

    corral(root.path())
        .args(["state", "Not_Valid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid container ID"));
}

#[test]
fn missing_config_file_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    corral(root.path())
        .args(["--config", "/nonexistent/corral.toml", "list"])
        .assert()
        .failure();
}
