//! Context manager: the bounded working memory handed to the model
//!
//! The window is a set of pinned entries (task, project guidelines, todo list)
//! plus an ordered list of turns. Its size is the character count of pinned
//! contents and turn contents, and it never exceeds the configured budget once
//! an operation returns:
//!
//! - each pinned entry is capped at `max_pinned_chars` (three kinds, so pins
//!   use at most three quarters of the default budget);
//! - an appended turn is clipped to what is left of the budget after pins;
//! - when over budget, [`ContextManager::reduce`] first compacts everything but
//!   the most recent turns into one summary note, then evicts oldest turns.
//!
//! Compaction keeps one line per collapsed turn: its role, the tool name, call
//! id, outcome, error kind and every path the call touched. Task and model
//! text keep their first 120 characters; tool payload bodies are dropped. An
//! earlier summary inside the collapsed run is merged line for line.

use chrono::Local;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use warden_config::ContextConfig;
use warden_provider::{Message, ToolCallDef};
use warden_session::turn::SUMMARY_HEADER;
use warden_session::{
    CallMeta, ContextSnapshot, Outcome, PinKind, PinnedEntry, Role, Turn, TurnContent,
};

const EXCERPT_CHARS: usize = 120;
const CLIP_MARKER: &str = "\n[... clipped]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub budget_chars: usize,
    /// Turns exempt from compaction
    pub keep_recent_turns: usize,
    pub max_turn_chars: usize,
    pub max_pinned_chars: usize,
}

impl From<&ContextConfig> for ContextLimits {
    fn from(config: &ContextConfig) -> Self {
        Self {
            budget_chars: config.budget_chars,
            keep_recent_turns: config.keep_recent_turns,
            max_turn_chars: config.max_turn_chars,
            max_pinned_chars: config.effective_max_pinned_chars(),
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    limits: ContextLimits,
    pinned: BTreeMap<PinKind, PinnedEntry>,
    turns: Vec<Turn>,
    guideline_path: Option<PathBuf>,
}

impl ContextManager {
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            limits,
            pinned: BTreeMap::new(),
            turns: Vec::new(),
            guideline_path: None,
        }
    }

    /// Re-read `path` as the guideline pin on every [`refresh_guideline`](Self::refresh_guideline)
    pub fn with_guideline(mut self, path: impl Into<PathBuf>) -> Self {
        self.guideline_path = Some(path.into());
        self
    }

    pub fn from_snapshot(limits: ContextLimits, snapshot: ContextSnapshot) -> Self {
        let mut manager = Self::new(limits);
        manager.restore(snapshot);
        manager
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn pinned(&self) -> impl Iterator<Item = &PinnedEntry> {
        self.pinned.values()
    }

    pub fn pinned_entry(&self, kind: PinKind) -> Option<&PinnedEntry> {
        self.pinned.get(&kind)
    }

    fn pinned_size(&self) -> usize {
        self.pinned.values().map(PinnedEntry::size).sum()
    }

    pub fn total_size(&self) -> usize {
        self.pinned_size() + self.turns.iter().map(|t| t.size).sum::<usize>()
    }

    /// Set (or replace) a pinned entry, capped at `max_pinned_chars`
    pub fn pin(&mut self, kind: PinKind, content: &str) {
        let content = clip(content, self.limits.max_pinned_chars);
        self.pinned.insert(kind, PinnedEntry { kind, content });
        self.reduce();
    }

    pub fn unpin(&mut self, kind: PinKind) {
        self.pinned.remove(&kind);
    }

    /// Append a turn, clipping it to the room the pins leave and reducing the
    /// window if it went over budget. Never fails.
    pub fn append(&mut self, mut turn: Turn) {
        let room = self.limits.budget_chars.saturating_sub(self.pinned_size());
        let cap = self.limits.max_turn_chars.min(room);
        if turn.size > cap {
            let clipped = clip(&turn.text(), cap);
            turn.size = clipped.chars().count();
            turn.content = TurnContent::Text(clipped);
        }
        self.turns.push(turn);
        self.reduce();
    }

    /// Bring the window back under budget. Does nothing when already within it,
    /// so repeated calls without new turns change nothing.
    pub fn reduce(&mut self) -> bool {
        let budget = self.limits.budget_chars;
        if self.total_size() <= budget {
            return false;
        }
        let before = (self.turns.len(), self.total_size());

        let split = self.turns.len().saturating_sub(self.limits.keep_recent_turns);
        let already_compact = split == 1 && self.turns[0].is_summary();
        if split > 0 && !already_compact {
            let run_size: usize = self.turns[..split].iter().map(|t| t.size).sum();
            let summary = Turn::note(summarize(&self.turns[..split], self.limits.max_turn_chars));
            if summary.size < run_size {
                self.turns.splice(..split, [summary]);
            }
        }

        while self.total_size() > budget && !self.turns.is_empty() {
            self.turns.remove(0);
        }

        debug!(
            "Reduced context from {} turns / {} chars to {} turns / {} chars",
            before.0,
            before.1,
            self.turns.len(),
            self.total_size()
        );
        true
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            pinned: self.pinned.values().cloned().collect(),
            turns: self.turns.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.pinned = snapshot
            .pinned
            .into_iter()
            .map(|entry| (entry.kind, entry))
            .collect();
        self.turns = snapshot.turns;
        self.reduce();
    }

    /// Re-read the guideline document; a missing or empty file removes the pin
    pub async fn refresh_guideline(&mut self) {
        let Some(path) = self.guideline_path.clone() else {
            return;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => {
                self.pin(PinKind::Guideline, content.trim());
            }
            Ok(_) => self.unpin(PinKind::Guideline),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Failed to read guideline {:?}: {}", path, e);
                }
                self.unpin(PinKind::Guideline);
            }
        }
    }

    /// Messages for the transport: one system message carrying the prompt and
    /// pinned entries, then the turns in order.
    pub fn render(&self, system_prompt: &str) -> Vec<Message> {
        let mut system = system_prompt.to_string();
        for entry in self.pinned.values() {
            system.push_str(&format!("\n\n## {}\n\n{}", entry.kind.title(), entry.content));
        }
        let mut messages = vec![Message::system(system)];

        let mut open_calls: HashSet<&str> = HashSet::new();
        for turn in &self.turns {
            let message = match turn.role {
                Role::Task => Message::user(turn.text()),
                Role::SystemNote => Message::user(format!("[note] {}", turn.text())),
                Role::Model if turn.calls.is_empty() => Message::assistant(turn.text()),
                Role::Model => {
                    let mut message = Message::assistant(turn.text());
                    message.tool_calls = Some(
                        turn.calls
                            .iter()
                            .map(|c| {
                                open_calls.insert(&c.call_id);
                                ToolCallDef::new(
                                    &c.call_id,
                                    &c.tool_name,
                                    c.arguments.clone().unwrap_or_else(|| json!({})),
                                )
                            })
                            .collect(),
                    );
                    message
                }
                Role::ToolResult => match turn.calls.first() {
                    // the issuing model turn was compacted away
                    Some(call) if open_calls.contains(call.call_id.as_str()) => {
                        Message::tool(&call.call_id, &call.tool_name, result_text(turn, call))
                    }
                    Some(call) => Message::user(format!(
                        "[result of {}#{}] {}",
                        call.tool_name,
                        call.call_id,
                        result_text(turn, call)
                    )),
                    None => Message::user(turn.text()),
                },
            };
            messages.push(message);
        }
        messages
    }
}

fn result_text(turn: &Turn, call: &CallMeta) -> String {
    match (call.outcome, call.error_kind) {
        (Some(Outcome::Success), _) | (None, _) => turn.text(),
        (Some(Outcome::Denied), _) => format!("[denied] {}", turn.text()),
        (Some(Outcome::Error), Some(kind)) => format!("[error: {}] {}", kind, turn.text()),
        (Some(Outcome::Error), None) => format!("[error] {}", turn.text()),
    }
}

/// Cut `text` to at most `max` characters, marking the cut when there is room
fn clip(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let marker = CLIP_MARKER.chars().count();
    if max <= marker {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - marker).collect();
    out.push_str(CLIP_MARKER);
    out
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        format!("{}...", flat.chars().take(EXCERPT_CHARS).collect::<String>())
    }
}

fn call_label(call: &CallMeta) -> String {
    if call.paths.is_empty() {
        format!("{}#{}", call.tool_name, call.call_id)
    } else {
        format!("{}#{} [{}]", call.tool_name, call.call_id, call.paths.join(", "))
    }
}

fn summary_line(turn: &Turn) -> String {
    match turn.role {
        Role::Task => format!("- task: {}", excerpt(&turn.text())),
        Role::SystemNote => format!("- system-note: {}", excerpt(&turn.text())),
        Role::Model => {
            let mut line = format!("- model: \"{}\"", excerpt(&turn.text()));
            if !turn.calls.is_empty() {
                let calls: Vec<String> = turn.calls.iter().map(call_label).collect();
                line.push_str(&format!(" calls: {}", calls.join(", ")));
            }
            line
        }
        Role::ToolResult => match turn.calls.first() {
            Some(call) => {
                let outcome = call.outcome.map(|o| o.as_str()).unwrap_or("unknown");
                let kind = call
                    .error_kind
                    .map(|k| format!("({})", k))
                    .unwrap_or_default();
                format!("- tool-result: {} {}{}", call_label(call), outcome, kind)
            }
            None => format!("- tool-result: {}", excerpt(&turn.text())),
        },
    }
}

/// Deterministic one-line-per-turn digest of a run of turns, capped at
/// `max_chars` by dropping its oldest lines.
fn summarize(turns: &[Turn], max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    for turn in turns {
        if turn.is_summary() {
            lines.extend(turn.text().lines().skip(1).map(str::to_string));
        } else {
            lines.push(summary_line(turn));
        }
    }

    let header_size = SUMMARY_HEADER.chars().count() + 1;
    let mut size: usize = header_size + lines.iter().map(|l| l.chars().count() + 1).sum::<usize>();
    let mut dropped = 0;
    while size > max_chars && !lines.is_empty() {
        size -= lines[0].chars().count() + 1;
        lines.remove(0);
        dropped += 1;
    }
    if dropped > 0 {
        lines.insert(0, format!("- ({} earlier entries dropped)", dropped));
    }

    let mut text = SUMMARY_HEADER.to_string();
    for line in lines {
        text.push('\n');
        text.push_str(&line);
    }
    text
}

/// Identity and operating rules for a run rooted at `root`
pub fn build_system_prompt(root: &Path, depth: u32) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
    let role = if depth == 0 {
        "You are warden, an autonomous coding agent."
    } else {
        "You are a warden sub-agent working on one delegated sub-task."
    };

    format!(
        r#"# warden

{}

## Current Time
{}

## Project
All work happens inside the project root: {}
Paths are relative to it. Anything outside it is refused.

## Working rules
- Act through the provided tools. Several independent calls may be issued at once.
- Calls that are denied or fail come back as results; adapt instead of repeating them.
- Keep the todo list current with todo_add and todo_update.
- When the task is complete, reply with the final answer as plain text and no tool calls.

If tool calling is unavailable, reply with a fenced json block:
```json
{{"actions": [{{"action": "<tool name>", "action_input": {{}}}}]}}
```"#,
        role,
        now,
        root.display()
    )
}
