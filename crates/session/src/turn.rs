//! Turns, pinned entries and the context window snapshot

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{ErrorKind, Outcome, ToolResult};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Task,
    Model,
    ToolResult,
    SystemNote,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Task => "task",
            Role::Model => "model",
            Role::ToolResult => "tool-result",
            Role::SystemNote => "system-note",
        }
    }
}

/// Turn payload: plain text or a structured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TurnContent {
    Text(String),
    Structured(Value),
}

impl TurnContent {
    /// Text shown to the model
    pub fn render(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Structured(value) => value.to_string(),
        }
    }
}

/// Correlation data for one tool call referenced by a turn.
///
/// Model turns carry one entry per Action Request (with its arguments), tool-result
/// turns carry exactly one entry with the outcome filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMeta {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Filesystem paths named in the call's arguments
    #[serde(default)]
    pub paths: Vec<String>,
}

/// One immutable unit of conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Local>,
    /// Size in units (characters of the rendered content)
    pub size: usize,
    #[serde(default)]
    pub calls: Vec<CallMeta>,
}

impl Turn {
    pub fn new(role: Role, content: TurnContent) -> Self {
        let size = content.render().chars().count();
        Self {
            role,
            content,
            timestamp: Local::now(),
            size,
            calls: Vec::new(),
        }
    }

    pub fn task(text: impl Into<String>) -> Self {
        Self::new(Role::Task, TurnContent::Text(text.into()))
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self::new(Role::SystemNote, TurnContent::Text(text.into()))
    }

    /// Model turn, optionally carrying the action requests it issued
    pub fn model(text: impl Into<String>, calls: Vec<CallMeta>) -> Self {
        let mut turn = Self::new(Role::Model, TurnContent::Text(text.into()));
        turn.calls = calls;
        turn
    }

    /// Tool-result turn for one result; `paths` are the paths named by the request
    pub fn tool_result(result: &ToolResult, paths: Vec<String>) -> Self {
        let mut turn = Self::new(Role::ToolResult, TurnContent::Text(result.payload.clone()));
        turn.calls = vec![CallMeta {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            arguments: None,
            outcome: Some(result.outcome),
            error_kind: result.error_kind,
            paths,
        }];
        turn
    }

    pub fn text(&self) -> String {
        self.content.render()
    }

    /// Whether this is a synthetic compaction summary
    pub fn is_summary(&self) -> bool {
        self.role == Role::SystemNote
            && matches!(&self.content, TurnContent::Text(t) if t.starts_with(SUMMARY_HEADER))
    }
}

/// First line of every compaction summary note
pub const SUMMARY_HEADER: &str = "[compacted history]";

/// Kinds of entries exempt from eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinKind {
    Task,
    Guideline,
    Todos,
}

impl PinKind {
    pub fn title(&self) -> &'static str {
        match self {
            PinKind::Task => "Task",
            PinKind::Guideline => "Project guidelines",
            PinKind::Todos => "Todo list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedEntry {
    pub kind: PinKind,
    pub content: String,
}

impl PinnedEntry {
    pub fn size(&self) -> usize {
        self.content.chars().count()
    }
}

/// Restorable copy of a context window: pinned set plus ordered remaining turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub pinned: Vec<PinnedEntry>,
    pub turns: Vec<Turn>,
}

impl ContextSnapshot {
    pub fn total_size(&self) -> usize {
        self.pinned.iter().map(PinnedEntry::size).sum::<usize>()
            + self.turns.iter().map(|t| t.size).sum::<usize>()
    }
}
