//! Content search over project files

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::filesystem::truncate_output;
use super::path_utils::{canonical_root, resolve_in_root};
use super::{parse_args, FieldSpec, Tier, ToolDescriptor, ToolError, ToolOutput, ToolTrait, ValueKind};

const DEFAULT_MAX_RESULTS: usize = 50;
/// Files larger than this are skipped
const MAX_FILE_BYTES: u64 = 1_000_000;
const MAX_LINE_CHARS: usize = 200;

pub struct SearchFilesTool {
    root: PathBuf,
    max_chars: usize,
    descriptor: ToolDescriptor,
}

impl SearchFilesTool {
    pub fn new(root: PathBuf, max_chars: usize) -> Self {
        let descriptor = ToolDescriptor::new(
            "search_files",
            "Search file contents inside the project with a case-insensitive regex. \
             Returns matching lines as path:line: text.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("pattern", ValueKind::String, "Regex to look for in file contents"))
        .field(FieldSpec::optional("path", ValueKind::String, "Directory to search, relative to the project root (default: .)"))
        .field(FieldSpec::optional("glob", ValueKind::String, "File name pattern such as *.rs (default: all files)"))
        .field(FieldSpec::optional("max_results", ValueKind::Integer, "Maximum matching lines to return"))
        .reads("path");
        Self {
            root: canonical_root(&root),
            max_chars,
            descriptor,
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[async_trait]
impl ToolTrait for SearchFilesTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: SearchArgs = parse_args(args)?;
        let content = RegexBuilder::new(&args.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern: {}", e)))?;
        let names = args.glob.as_deref().map(NamePattern::new).transpose()?;
        let limit = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);

        let base_arg = args.path.as_deref().unwrap_or(".");
        let base = resolve_in_root(base_arg, &self.root)?;
        debug!("Searching {:?} for {:?}", base, args.pattern);

        let files = if base.is_file() {
            vec![base]
        } else if base.is_dir() {
            collect_files(&base).await?
        } else {
            return Err(ToolError::Failed(format!("no such path: {}", base_arg)));
        };

        let mut matches = Vec::new();
        let mut files_matched = 0;
        'files: for file in files {
            let relative = file.strip_prefix(&self.root).unwrap_or(&file);
            if let Some(names) = &names {
                if !names.matches(relative) {
                    continue;
                }
            }
            // binary and unreadable files are skipped
            let Ok(text) = tokio::fs::read_to_string(&file).await else {
                continue;
            };

            let mut hit = false;
            for (number, line) in text.lines().enumerate() {
                if !content.is_match(line) {
                    continue;
                }
                hit = true;
                matches.push(format!(
                    "{}:{}: {}",
                    relative.display(),
                    number + 1,
                    shorten(line.trim())
                ));
                if matches.len() >= limit {
                    files_matched += 1;
                    break 'files;
                }
            }
            if hit {
                files_matched += 1;
            }
        }

        if matches.is_empty() {
            return Ok(format!("no matches for {}", args.pattern));
        }
        let mut output = matches.join("\n");
        if matches.len() >= limit {
            output.push_str(&format!("\n[stopped after {} matches]", limit));
        } else {
            output.push_str(&format!(
                "\n({} matches in {} files)",
                matches.len(),
                files_matched
            ));
        }
        Ok(truncate_output(&output, self.max_chars))
    }
}

/// Regular files under `dir` in path order. Hidden entries and symlinks are
/// not followed.
async fn collect_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() && entry.metadata().await?.len() <= MAX_FILE_BYTES {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Glob with `*`, `**/` and `?` wildcards. A pattern without `/` matches the
/// file name only.
struct NamePattern {
    re: Regex,
    whole_path: bool,
}

impl NamePattern {
    fn new(glob: &str) -> Result<Self, ToolError> {
        let body = regex::escape(glob)
            .replace(r"\*\*/", "(.*/)?")
            .replace(r"\*", "[^/]*")
            .replace(r"\?", "[^/]");
        let re = Regex::new(&format!("^{}$", body))
            .map_err(|e| ToolError::InvalidArguments(format!("invalid glob: {}", e)))?;
        Ok(Self {
            re,
            whole_path: glob.contains('/'),
        })
    }

    fn matches(&self, relative: &Path) -> bool {
        let full = relative.to_string_lossy().replace('\\', "/");
        if self.whole_path {
            self.re.is_match(&full)
        } else {
            let name = full.rsplit('/').next().unwrap_or(&full);
            self.re.is_match(name)
        }
    }
}

fn shorten(line: &str) -> String {
    if line.chars().count() > MAX_LINE_CHARS {
        let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        let rs = NamePattern::new("*.rs").unwrap();
        assert!(rs.matches(Path::new("src/lib.rs")));
        assert!(!rs.matches(Path::new("src/lib.rsx")));

        let nested = NamePattern::new("src/**/*.rs").unwrap();
        assert!(nested.matches(Path::new("src/a/b.rs")));
        assert!(nested.matches(Path::new("src/b.rs")));
        assert!(!nested.matches(Path::new("tests/b.rs")));

        let single = NamePattern::new("v?.txt").unwrap();
        assert!(single.matches(Path::new("v1.txt")));
        assert!(!single.matches(Path::new("v10.txt")));
    }
}
