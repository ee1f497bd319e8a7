//! Shell command execution

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::filesystem::truncate_output;
use super::path_utils::resolve_in_root;
use super::{parse_args, FieldSpec, Tier, ToolDescriptor, ToolError, ToolOutput, ToolTrait, ValueKind};

/// Run a prepared command and fold stdout, stderr and the exit status into one
/// report. A non-zero exit is a tool failure carrying the same report.
///
/// The child is killed when the returned future is dropped, so dispatcher
/// timeouts and cancellation stop the process too.
pub(crate) async fn run_process(mut cmd: Command, max_chars: usize) -> ToolOutput {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .map_err(|e| ToolError::Failed(format!("failed to start process: {}", e)))?;

    let mut parts = Vec::new();
    if !output.stdout.is_empty() {
        parts.push(String::from_utf8_lossy(&output.stdout).to_string());
    }
    if !output.stderr.is_empty() {
        parts.push(format!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr)));
    }
    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        parts.push(format!("exit code: {}", code));
    }
    let report = if parts.is_empty() {
        "(no output)".to_string()
    } else {
        truncate_output(&parts.join("\n"), max_chars)
    };

    if output.status.success() {
        Ok(report)
    } else {
        Err(ToolError::Failed(report))
    }
}

pub struct ExecTool {
    root: PathBuf,
    max_chars: usize,
    descriptor: ToolDescriptor,
}

impl ExecTool {
    pub fn new(root: PathBuf, max_chars: usize) -> Self {
        let descriptor = ToolDescriptor::new(
            "exec",
            "Run a shell command (sh -c) in the project. Output is truncated.",
            Tier::Sandbox,
        )
        .field(FieldSpec::required("command", ValueKind::String, "Shell command"))
        .field(FieldSpec::optional(
            "working_dir",
            ValueKind::String,
            "Working directory inside the project (default: project root)",
        ))
        .command("command")
        .cwd("working_dir");
        Self {
            root,
            max_chars,
            descriptor,
        }
    }
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    working_dir: Option<String>,
}

#[async_trait]
impl ToolTrait for ExecTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: ExecArgs = parse_args(args)?;
        let working_dir = match args.working_dir.as_deref() {
            Some(dir) => resolve_in_root(dir, &self.root)?,
            None => self.root.clone(),
        };

        debug!("Executing in {:?}: {}", working_dir, args.command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&args.command).current_dir(working_dir);
        run_process(cmd, self.max_chars).await
    }
}
