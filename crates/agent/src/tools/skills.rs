//! Skills: composite tools declared in TOML
//!
//! ```toml
//! name = "test_and_report"
//! description = "Run the test suite and save the output"
//!
//! [[params]]
//! name = "report"
//! kind = "string"
//! required = true
//!
//! [[steps]]
//! tool = "exec"
//! args = { command = "cargo test" }
//!
//! [[steps]]
//! tool = "write_file"
//! args = { path = "{{report}}", content = "{{steps.0}}" }
//! ```
//!
//! `{{name}}` is replaced by a skill argument and `{{steps.N}}` by the output of
//! step N. The dispatcher expands and runs the steps; a skill never runs itself.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

use super::{FieldSpec, SkillStep, Tier, ToolDescriptor, ToolError, ToolOutput, ToolRegistry, ToolTrait};
use crate::AgentError;

#[derive(Debug, Deserialize)]
struct SkillFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    params: Vec<FieldSpec>,
    steps: Vec<SkillStep>,
}

pub struct SkillTool {
    descriptor: ToolDescriptor,
}

impl SkillTool {
    pub fn new(name: &str, description: &str, params: Vec<FieldSpec>, steps: Vec<SkillStep>) -> Self {
        let mut descriptor = ToolDescriptor::new(name, description, Tier::Skill).steps(steps);
        descriptor.fields = params;
        descriptor.concurrent = false;
        Self { descriptor }
    }

    /// Parse a skill definition
    pub fn from_toml(source: &str) -> Result<Self, AgentError> {
        let file: SkillFile = toml::from_str(source).map_err(|e| AgentError::Skill {
            name: "<unparsed>".to_string(),
            reason: e.to_string(),
        })?;
        if file.steps.is_empty() {
            return Err(AgentError::Skill {
                name: file.name,
                reason: "no steps declared".to_string(),
            });
        }
        let description = if file.description.is_empty() {
            format!("Skill running {} steps", file.steps.len())
        } else {
            file.description
        };
        Ok(Self::new(&file.name, &description, file.params, file.steps))
    }

    /// Mark the skill concurrent when every step's tool is
    pub fn resolve_concurrency(mut self, registry: &ToolRegistry) -> Self {
        self.descriptor.concurrent = self
            .descriptor
            .steps
            .iter()
            .all(|s| registry.descriptor(&s.tool).map(|d| d.concurrent).unwrap_or(false));
        self
    }
}

#[async_trait]
impl ToolTrait for SkillTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _args: Map<String, Value>) -> ToolOutput {
        Err(ToolError::Failed(format!(
            "skill {} must be expanded by the dispatcher",
            self.descriptor.name
        )))
    }
}

/// Every step must name a registered atomic or sandbox tool
pub fn check_steps(descriptor: &ToolDescriptor, registry: &ToolRegistry) -> Result<(), AgentError> {
    for (i, step) in descriptor.steps.iter().enumerate() {
        let reason = match registry.descriptor(&step.tool) {
            None => format!("step {} names unknown tool {}", i, step.tool),
            Some(d) if d.tier == Tier::Skill => {
                format!("step {} names skill {}; skills cannot nest", i, step.tool)
            }
            Some(_) => continue,
        };
        return Err(AgentError::Skill {
            name: descriptor.name.clone(),
            reason,
        });
    }
    Ok(())
}

/// Load every `*.toml` skill in `dir`; unreadable or invalid files are skipped
pub async fn load_skills(dir: &Path) -> Vec<SkillTool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => {
            debug!("No skills directory at {:?}", dir);
            return Vec::new();
        }
    };

    let mut skills = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to read skill {:?}: {}", path, e);
                continue;
            }
        };
        match SkillTool::from_toml(&source) {
            Ok(skill) => skills.push(skill),
            Err(e) => warn!("Invalid skill {:?}: {}", path, e),
        }
    }
    skills.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
    skills
}

/// Substitute `{{param}}` and `{{steps.N}}` placeholders in a step's arguments.
///
/// A string that is exactly one placeholder takes the referenced value as-is
/// (keeping its JSON type); embedded placeholders are spliced in as text.
/// Unresolved placeholders are left untouched.
pub fn expand_step_args(
    template: &Map<String, Value>,
    params: &Map<String, Value>,
    outputs: &[String],
) -> Map<String, Value> {
    let lookup = |key: &str| -> Option<Value> {
        match key.strip_prefix("steps.") {
            Some(index) => index
                .parse::<usize>()
                .ok()
                .and_then(|i| outputs.get(i))
                .map(|o| Value::String(o.clone())),
            None => params.get(key).cloned(),
        }
    };
    template
        .iter()
        .map(|(k, v)| (k.clone(), expand_value(v, &lookup)))
        .collect()
}

fn expand_value(value: &Value, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
    match value {
        Value::String(s) => expand_string(s, lookup),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, lookup)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_string(s: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
    if let Some(key) = whole_placeholder(s) {
        if let Some(value) = lookup(key) {
            return value;
        }
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        match lookup(after[..end].trim()) {
            Some(Value::String(text)) => out.push_str(&text),
            Some(Value::Null) => {}
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
