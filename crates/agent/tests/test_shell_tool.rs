//! Tests for the sandbox tier: shell and python execution

#![cfg(unix)]

use serde_json::{json, Map, Value};
use std::fs;
use tempfile::TempDir;
use warden_agent::tools::{ExecTool, RunPythonTool, ToolTrait};
use warden_agent::SafetyGuard;

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_exec_echo() {
    let temp_dir = TempDir::new().unwrap();
    let tool = ExecTool::new(temp_dir.path().to_path_buf(), 1000);

    let result = tool
        .invoke(args(json!({"command": "echo 'Hello from shell'"})))
        .await
        .unwrap();
    assert!(result.contains("Hello from shell"));
}

#[tokio::test]
async fn test_exec_working_dir_inside_root() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("sub")).unwrap();
    let tool = ExecTool::new(temp_dir.path().to_path_buf(), 1000);

    let result = tool
        .invoke(args(json!({"command": "pwd", "working_dir": "sub"})))
        .await
        .unwrap();
    assert!(result.trim().ends_with("/sub"));
}

#[tokio::test]
async fn test_exec_working_dir_outside_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("project");
    fs::create_dir(&root).unwrap();
    let tool = ExecTool::new(root, 1000);

    let err = tool
        .invoke(args(json!({"command": "pwd", "working_dir": ".."})))
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("outside project root"),
        "Expected root error, got: {}",
        err
    );
}

#[tokio::test]
async fn test_exec_reports_stderr_and_status() {
    let temp_dir = TempDir::new().unwrap();
    let tool = ExecTool::new(temp_dir.path().to_path_buf(), 1000);

    let err = tool
        .invoke(args(json!({"command": "ls does-not-exist"})))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("STDERR"));
    assert!(text.contains("exit code:"));
}

#[tokio::test]
async fn test_exec_output_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let tool = ExecTool::new(temp_dir.path().to_path_buf(), 50);

    let result = tool
        .invoke(args(json!({"command": "seq 1 1000"})))
        .await
        .unwrap();
    assert!(result.contains("[output truncated"));
}

#[tokio::test]
async fn test_exec_missing_command_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let tool = ExecTool::new(temp_dir.path().to_path_buf(), 1000);

    assert!(tool.invoke(args(json!({}))).await.is_err());
}

#[tokio::test]
async fn test_python_runs_from_root() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("data.txt"), "42").unwrap();
    let tool = RunPythonTool::new(temp_dir.path().to_path_buf(), 1000);

    let result = tool
        .invoke(args(json!({"code": "print(open('data.txt').read())"})))
        .await;
    // python3 may be absent on minimal hosts
    if let Ok(out) = result {
        assert_eq!(out.trim(), "42");
    }
}

#[test]
fn test_sandbox_descriptors_are_guarded() {
    let temp_dir = TempDir::new().unwrap();
    let guard = SafetyGuard::new(temp_dir.path());
    let exec = ExecTool::new(temp_dir.path().to_path_buf(), 1000);
    let python = RunPythonTool::new(temp_dir.path().to_path_buf(), 1000);

    assert!(exec.descriptor().requires_guard);
    assert!(!exec.descriptor().concurrent);
    assert!(guard
        .evaluate(exec.descriptor(), &args(json!({"command": "rm -rf /"})))
        .is_deny());
    assert!(guard
        .evaluate(python.descriptor(), &args(json!({"code": "import os\nos.system('id')"})))
        .is_deny());
    assert!(guard
        .evaluate(python.descriptor(), &args(json!({"code": "print(sum(range(10)))"})))
        .is_allow());
}
