//! CLI integration tests
//!
//! Exercise argument parsing, validation and exit codes of the built binary.
//! None of these need a container engine: every failure here happens before
//! the engine is contacted, and unpinned planning never contacts it.

mod support;

use std::process::{Command, Output};
use support::{fixture_path, slipway_bin, write_tree};
use tempfile::TempDir;

fn command(args: &[&str]) -> Command {
    let mut command = Command::new(slipway_bin());
    command
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("SLIPWAY_LOG_LEVEL");
    command
}

fn slipway(args: &[&str]) -> Output {
    command(args).output().expect("Failed to execute slipway")
}

#[test]
fn test_cli_help() {
    let output = slipway(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["build", "plan", "run", "up", "health"] {
        assert!(stdout.contains(command), "help is missing '{}'", command);
    }
}

#[test]
fn test_cli_version() {
    let output = slipway(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("slipway"));
}

#[test]
fn test_build_help_lists_stage_flags() {
    let output = slipway(&["build", "--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--tag",
        "--base",
        "--manifest",
        "--entrypoint",
        "--port",
        "--pull",
        "--no-resolve",
        "--skip-entrypoint-check",
        "--rebuild",
    ] {
        assert!(stdout.contains(flag), "build help is missing {}", flag);
    }
}

#[test]
fn test_unknown_format_is_usage_error() {
    let output = slipway(&["plan", "--format", "xml"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_context_is_source_tree_error() {
    let output = slipway(&["plan", "/nonexistent/slipway/context"]);
    assert_eq!(output.status.code(), Some(13));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("artifact placement failed"), "{}", stderr);
}

#[test]
fn test_context_that_is_a_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("main.py", "app = 1\n")]);
    let file = dir.path().join("main.py");

    let output = slipway(&["build", file.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(13));
}

#[test]
fn test_invalid_port_is_config_error() {
    let dir = TempDir::new().unwrap();
    let output = slipway(&["plan", dir.path().to_str().unwrap(), "--port", "0"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_project_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("slipway.toml", "entrypoint = [\"not\", \"a\", \"string\"]\n")]);

    let output = slipway(&["build", dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_run_rejects_malformed_env() {
    let output = slipway(&["run", "shortener:latest", "-e", "NOT AN ASSIGNMENT"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_run_rejects_missing_env_file() {
    let output = slipway(&[
        "run",
        "shortener:latest",
        "--env-file",
        "/nonexistent/slipway/.env",
    ]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    let output = slipway(&["-v", "-q", "health"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unpinned_plan_runs_without_engine() {
    let fixture = fixture_path("shortener");
    let output = command(&[
        "plan",
        "--no-pin",
        "--no-resolve",
        "-f",
        "dockerfile",
        fixture.to_str().unwrap(),
    ])
    .env("DOCKER_HOST", "unix:///nonexistent/slipway/docker.sock")
    .env_remove("SLIPWAY_BASE_IMAGE")
    .output()
    .expect("Failed to execute slipway");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(0), "{}", stderr);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let from = stdout.lines().find(|l| l.starts_with("FROM ")).expect("FROM line");
    assert!(from.contains("python:3.11-slim"), "{}", from);
    assert!(!from.contains("@sha256:"), "{}", from);
}

#[test]
fn test_pinned_plan_needs_engine() {
    let fixture = fixture_path("shortener");
    let output = command(&["plan", "--no-resolve", fixture.to_str().unwrap()])
        .env("DOCKER_HOST", "unix:///nonexistent/slipway/docker.sock")
        .output()
        .expect("Failed to execute slipway");

    assert_eq!(output.status.code(), Some(17));
}
