//! CLI argument parsing tests for warden

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn warden() -> Command {
    Command::new(env!("CARGO_BIN_EXE_warden"))
}

#[test]
fn test_help_flag() {
    let mut cmd = warden();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("autonomous coding agent"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    let mut cmd = warden();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_help() {
    let mut cmd = warden();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_run_command_help() {
    let mut cmd = warden();
    cmd.args(["run", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Run a task to completion"))
        .stdout(predicate::str::contains("-p, --project"))
        .stdout(predicate::str::contains("--plan"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--deny"));
}

#[test]
fn test_run_requires_task() {
    let mut cmd = warden();
    cmd.arg("run");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<TASK>"));
}

#[test]
fn test_yes_and_deny_conflict() {
    let mut cmd = warden();
    cmd.args(["run", "--yes", "--deny", "do it"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_resume_command_help() {
    let mut cmd = warden();
    cmd.args(["resume", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Resume a stored session"))
        .stdout(predicate::str::contains("-m, --message"));
}

#[test]
fn test_resume_requires_id() {
    let mut cmd = warden();
    cmd.arg("resume");
    cmd.assert().failure().stderr(predicate::str::contains("<ID>"));
}

#[test]
fn test_session_commands_help() {
    for (sub, text) in [
        ("sessions", "List sessions"),
        ("show", "Show a stored session"),
        ("unlock", "Release the lease"),
        ("status", "Show system status"),
        ("init", "Initialize"),
    ] {
        let mut cmd = warden();
        cmd.args([sub, "--help"]);
        cmd.assert().success().stdout(predicate::str::contains(text));
    }
}

#[test]
fn test_unknown_command() {
    let mut cmd = warden();
    cmd.arg("deploy");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
