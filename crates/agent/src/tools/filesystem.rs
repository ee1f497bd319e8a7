//! File system tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::path_utils::resolve_in_root;
use super::{parse_args, FieldSpec, Tier, ToolDescriptor, ToolError, ToolOutput, ToolTrait, ValueKind};

/// Cut `text` to at most `max_chars` characters, noting how much was dropped
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n[output truncated: {} more chars]", kept, total - max_chars)
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write through a temp file in the same directory and rename over the target
pub async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}-{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

pub struct ReadFileTool {
    root: PathBuf,
    max_chars: usize,
    descriptor: ToolDescriptor,
}

impl ReadFileTool {
    pub fn new(root: PathBuf, max_chars: usize) -> Self {
        let descriptor = ToolDescriptor::new(
            "read_file",
            "Read a text file inside the project.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("path", ValueKind::String, "File path, relative to the project root"))
        .reads("path");
        Self {
            root,
            max_chars,
            descriptor,
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ReadFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: PathArgs = parse_args(args)?;
        let path = resolve_in_root(&args.path, &self.root)?;

        debug!("Reading {:?}", path);
        if !path.is_file() {
            return Err(ToolError::Failed(format!("not a file: {}", args.path)));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(truncate_output(&content, self.max_chars))
    }
}

pub struct WriteFileTool {
    root: PathBuf,
    descriptor: ToolDescriptor,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        let descriptor = ToolDescriptor::new(
            "write_file",
            "Create or overwrite a file inside the project. Parent directories are created.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("path", ValueKind::String, "File path, relative to the project root"))
        .field(FieldSpec::required("content", ValueKind::String, "Full file content"))
        .writes("path");
        Self { root, descriptor }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolTrait for WriteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: WriteFileArgs = parse_args(args)?;
        let path = resolve_in_root(&args.path, &self.root)?;

        debug!("Writing {:?}", path);
        if path.is_dir() {
            return Err(ToolError::Failed(format!("{} is a directory", args.path)));
        }
        write_atomic(&path, &args.content).await?;
        Ok(format!("wrote {} bytes to {}", args.content.len(), args.path))
    }
}

pub struct EditFileTool {
    root: PathBuf,
    descriptor: ToolDescriptor,
}

impl EditFileTool {
    pub fn new(root: PathBuf) -> Self {
        let descriptor = ToolDescriptor::new(
            "edit_file",
            "Replace old_text with new_text in a file. old_text must occur exactly once.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("path", ValueKind::String, "File path, relative to the project root"))
        .field(FieldSpec::required("old_text", ValueKind::String, "Exact text to replace"))
        .field(FieldSpec::required("new_text", ValueKind::String, "Replacement text"))
        .writes("path");
        Self { root, descriptor }
    }
}

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[async_trait]
impl ToolTrait for EditFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: EditFileArgs = parse_args(args)?;
        let path = resolve_in_root(&args.path, &self.root)?;

        debug!("Editing {:?}", path);
        if !path.is_file() {
            return Err(ToolError::Failed(format!("not a file: {}", args.path)));
        }
        if args.old_text.is_empty() {
            return Err(ToolError::InvalidArguments("old_text must not be empty".to_string()));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        match content.matches(&args.old_text).count() {
            0 => Err(ToolError::Failed(format!("old_text not found in {}", args.path))),
            1 => {
                let updated = content.replacen(&args.old_text, &args.new_text, 1);
                write_atomic(&path, &updated).await?;
                Ok(format!("edited {}", args.path))
            }
            n => Err(ToolError::Failed(format!(
                "old_text is ambiguous: {} matches in {}",
                n, args.path
            ))),
        }
    }
}

pub struct ListDirTool {
    root: PathBuf,
    descriptor: ToolDescriptor,
}

impl ListDirTool {
    pub fn new(root: PathBuf) -> Self {
        let descriptor = ToolDescriptor::new(
            "list_dir",
            "List the entries of a directory inside the project.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("path", ValueKind::String, "Directory path, relative to the project root"))
        .reads("path");
        Self { root, descriptor }
    }
}

#[async_trait]
impl ToolTrait for ListDirTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: PathArgs = parse_args(args)?;
        let path = resolve_in_root(&args.path, &self.root)?;

        debug!("Listing {:?}", path);
        if !path.is_dir() {
            return Err(ToolError::Failed(format!("not a directory: {}", args.path)));
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = if entry.file_type().await?.is_dir() { "/" } else { "" };
            items.push(format!("{}{}", name, suffix));
        }
        items.sort();
        if items.is_empty() {
            Ok(format!("(empty directory: {})", args.path))
        } else {
            Ok(items.join("\n"))
        }
    }
}
