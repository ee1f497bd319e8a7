//! Tool contract, descriptors and the registry

pub mod filesystem;
pub mod path_utils;
pub mod python;
pub mod schema;
pub mod search;
pub mod shell;
pub mod skills;
pub mod web;

pub use filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use python::RunPythonTool;
pub use schema::{FieldSpec, ValueKind};
pub use search::SearchFilesTool;
pub use shell::ExecTool;
pub use skills::{load_skills, SkillTool};
pub use web::WebFetchTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use warden_provider::Tool;
use warden_session::ErrorKind;

use self::path_utils::PathValidationError;

/// Capability tier of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Read-only or narrowly scoped effects
    Atomic,
    /// Shell and code execution
    Sandbox,
    /// Composite: a declared sequence of atomic/sandbox calls
    Skill,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Atomic => "atomic",
            Tier::Sandbox => "sandbox",
            Tier::Skill => "skill",
        }
    }
}

/// One step of a skill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStep {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Static metadata the dispatcher needs to route and gate a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub tier: Tier,
    pub fields: Vec<FieldSpec>,
    /// May run alongside other calls of the same turn
    pub concurrent: bool,
    /// Must pass the safety guard before running
    pub requires_guard: bool,
    /// Arguments naming filesystem paths (reads and writes)
    pub path_fields: Vec<String>,
    /// Subset of `path_fields` the tool writes to
    pub write_fields: Vec<String>,
    pub command_fields: Vec<String>,
    pub code_fields: Vec<String>,
    /// Path argument used as the working directory for commands
    pub cwd_field: Option<String>,
    pub steps: Vec<SkillStep>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, tier: Tier) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            tier,
            fields: Vec::new(),
            concurrent: tier == Tier::Atomic,
            requires_guard: tier == Tier::Sandbox,
            path_fields: Vec::new(),
            write_fields: Vec::new(),
            command_fields: Vec::new(),
            code_fields: Vec::new(),
            cwd_field: None,
            steps: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Declare a path argument the tool reads
    pub fn reads(mut self, field: &str) -> Self {
        self.path_fields.push(field.to_string());
        self.requires_guard = true;
        self
    }

    /// Declare a path argument the tool writes
    pub fn writes(mut self, field: &str) -> Self {
        self.write_fields.push(field.to_string());
        self.reads(field)
    }

    pub fn command(mut self, field: &str) -> Self {
        self.command_fields.push(field.to_string());
        self.requires_guard = true;
        self
    }

    pub fn code(mut self, field: &str) -> Self {
        self.code_fields.push(field.to_string());
        self.requires_guard = true;
        self
    }

    pub fn cwd(mut self, field: &str) -> Self {
        self.cwd_field = Some(field.to_string());
        self.reads(field)
    }

    pub fn steps(mut self, steps: Vec<SkillStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Tool definition offered to the model
    pub fn definition(&self) -> Tool {
        Tool::new(
            &self.name,
            &self.description,
            schema::to_json_schema(&self.fields),
        )
    }

    /// String values of the declared path arguments present in `args`
    pub fn declared_paths(&self, args: &Map<String, Value>) -> Vec<String> {
        string_values(&self.path_fields, args)
    }

    pub fn declared_writes(&self, args: &Map<String, Value>) -> Vec<String> {
        string_values(&self.write_fields, args)
    }
}

fn string_values(fields: &[String], args: &Map<String, Value>) -> Vec<String> {
    fields
        .iter()
        .filter_map(|f| args.get(f).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    OutsideRoot(#[from] PathValidationError),
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidArguments(e.to_string())
    }
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            ToolError::OutsideRoot(_) => ErrorKind::Denied,
            ToolError::Failed(_) | ToolError::Io(_) | ToolError::Http(_) => {
                ErrorKind::ExecutionFailed
            }
        }
    }
}

pub type ToolOutput = Result<String, ToolError>;

/// Deserialize validated arguments into a typed struct
pub fn parse_args<T: serde::de::DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolError> {
    Ok(serde_json::from_value(Value::Object(args))?)
}

/// Uniform invocation contract shared by every tier
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

type BoxedTool = Box<dyn ToolTrait>;

/// Tool registry keyed by unique name
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool; a tool with the same name is replaced
    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        self.register_boxed(Box::new(tool));
    }

    pub fn register_boxed(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!("Tool {} registered twice, keeping the later one", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolTrait> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.get(name).map(|t| t.descriptor())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Sorted tool names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the model, sorted by name for a stable prompt
    pub fn definitions(&self) -> Vec<Tool> {
        self.names()
            .iter()
            .filter_map(|n| self.descriptor(n))
            .map(ToolDescriptor::definition)
            .collect()
    }

    /// Registered names within edit distance 3 of `name`, closest first
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        let wanted = name.to_lowercase();
        let mut scored: Vec<(usize, String)> = self
            .tools
            .keys()
            .map(|candidate| (edit_distance(&wanted, &candidate.to_lowercase()), candidate.clone()))
            .filter(|(distance, _)| *distance <= 3)
            .collect();
        scored.sort();
        scored.into_iter().take(3).map(|(_, n)| n).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

/// Register the built-in tools rooted at `root`
pub fn register_default_tools(registry: &mut ToolRegistry, root: &Path, max_output_chars: usize) {
    registry.register(ReadFileTool::new(root.to_path_buf(), max_output_chars));
    registry.register(WriteFileTool::new(root.to_path_buf()));
    registry.register(EditFileTool::new(root.to_path_buf()));
    registry.register(ListDirTool::new(root.to_path_buf()));
    registry.register(SearchFilesTool::new(root.to_path_buf(), max_output_chars));

    registry.register(ExecTool::new(root.to_path_buf(), max_output_chars));
    registry.register(RunPythonTool::new(root.to_path_buf(), max_output_chars));

    registry.register(WebFetchTool::new(max_output_chars));
}

/// Built-in tools plus the project's skills from `skills_dir`
pub async fn standard_registry(root: &Path, skills_dir: &Path, max_output_chars: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, root, max_output_chars);

    for skill in load_skills(skills_dir).await {
        if registry.has(skill.name()) {
            warn!("Skipping skill {}: name already taken by a tool", skill.name());
            continue;
        }
        match skills::check_steps(skill.descriptor(), &registry) {
            Ok(()) => {
                debug!("Registered skill {}", skill.name());
                let skill = skill.resolve_concurrency(&registry);
                registry.register(skill);
            }
            Err(e) => warn!("Skipping skill: {}", e),
        }
    }
    registry
}
