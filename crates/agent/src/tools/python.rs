//! Sandboxed Python snippets

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::shell::run_process;
use super::{parse_args, FieldSpec, Tier, ToolDescriptor, ToolOutput, ToolTrait, ValueKind};

/// Runs `python3 -c <code>` from the project root. The code is scanned by the
/// safety guard before the dispatcher lets it run.
pub struct RunPythonTool {
    root: PathBuf,
    max_chars: usize,
    interpreter: String,
    descriptor: ToolDescriptor,
}

impl RunPythonTool {
    pub fn new(root: PathBuf, max_chars: usize) -> Self {
        let descriptor = ToolDescriptor::new(
            "run_python",
            "Run a Python 3 snippet from the project root and return its output.",
            Tier::Sandbox,
        )
        .field(FieldSpec::required("code", ValueKind::String, "Python source to run"))
        .code("code");
        Self {
            root,
            max_chars,
            interpreter: "python3".to_string(),
            descriptor,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[derive(Deserialize)]
struct PythonArgs {
    code: String,
}

#[async_trait]
impl ToolTrait for RunPythonTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: PythonArgs = parse_args(args)?;
        debug!("Running {} snippet ({} chars)", self.interpreter, args.code.len());

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c").arg(&args.code).current_dir(&self.root);
        run_process(cmd, self.max_chars).await
    }
}
