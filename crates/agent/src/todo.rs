//! Task/todo manager
//!
//! Keeps the ordered todo list of one session. Status changes follow the
//! monotonic rule of [`TodoStatus::can_transition_to`].

use regex::Regex;
use tracing::debug;

use warden_session::{TodoItem, TodoStatus};

use crate::{AgentError, Result};

#[derive(Debug, Clone)]
pub struct TodoManager {
    /// Session the items belong to; parent of top-level items
    task_id: String,
    items: Vec<TodoItem>,
    next_id: u32,
}

impl TodoManager {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            items: Vec::new(),
            next_id: 1,
        }
    }

    /// Restore a persisted list
    pub fn from_items(task_id: impl Into<String>, items: Vec<TodoItem>) -> Self {
        let next_id = items
            .iter()
            .filter_map(|item| item.id.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            task_id: task_id.into(),
            items,
            next_id,
        }
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, description: &str, parent: Option<String>) -> &TodoItem {
        let item = TodoItem {
            id: self.next_id.to_string(),
            description: description.trim().to_string(),
            status: TodoStatus::Pending,
            parent_task_id: Some(parent.unwrap_or_else(|| self.task_id.clone())),
        };
        self.next_id += 1;
        self.items.push(item);
        &self.items[self.items.len() - 1]
    }

    /// Start the list with the whole task as its single item
    pub fn seed_root(&mut self, task: &str) {
        self.items.clear();
        self.next_id = 1;
        self.push(task, None);
    }

    /// Split a task into ordered items: numbered or bulleted lines first, then
    /// `;` or "then" separated clauses, otherwise the task as one item.
    pub fn decompose(&mut self, task: &str) -> &[TodoItem] {
        self.items.clear();
        self.next_id = 1;
        for step in split_task(task) {
            self.push(&step, None);
        }
        debug!("Decomposed task into {} items", self.items.len());
        &self.items
    }

    /// Append an item; `parent` must name an existing item
    pub fn add(&mut self, description: &str, parent: Option<&str>) -> Result<&TodoItem> {
        if description.trim().is_empty() {
            return Err(AgentError::InvalidArguments(
                "todo description is empty".to_string(),
            ));
        }
        if let Some(parent) = parent {
            if !self.items.iter().any(|item| item.id == parent) {
                return Err(AgentError::UnknownTodo(parent.to_string()));
            }
        }
        Ok(self.push(description, parent.map(str::to_string)))
    }

    pub fn update(&mut self, id: &str, status: TodoStatus) -> Result<&TodoItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| AgentError::UnknownTodo(id.to_string()))?;
        if !item.status.can_transition_to(status) {
            return Err(AgentError::InvalidTransition {
                id: id.to_string(),
                from: item.status,
                to: status,
            });
        }
        item.status = status;
        Ok(item)
    }

    /// (done, total)
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .items
            .iter()
            .filter(|item| item.status == TodoStatus::Done)
            .count();
        (done, self.items.len())
    }

    /// Checklist pinned into the context
    pub fn summary(&self) -> String {
        if self.items.is_empty() {
            return "(no todo items)".to_string();
        }
        let mut lines: Vec<String> = self
            .items
            .iter()
            .map(|item| {
                let indent = match &item.parent_task_id {
                    Some(parent) if *parent != self.task_id => "  ",
                    _ => "",
                };
                format!("{}{} {}. {}", indent, item.status.marker(), item.id, item.description)
            })
            .collect();
        let (done, total) = self.progress();
        lines.push(format!("({}/{} done)", done, total));
        lines.join("\n")
    }
}

fn split_task(task: &str) -> Vec<String> {
    let listed: Vec<String> = task
        .lines()
        .filter_map(|line| strip_list_marker(line.trim()))
        .filter(|item| !item.is_empty())
        .collect();
    if listed.len() >= 2 {
        return listed;
    }

    let flat = task.split_whitespace().collect::<Vec<_>>().join(" ");
    let clauses: Vec<String> = flat
        .split(';')
        .flat_map(split_then)
        .map(|clause| clause.trim().trim_end_matches(['.', ',']).trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect();
    if clauses.len() >= 2 {
        return clauses;
    }
    vec![flat]
}

fn split_then(text: &str) -> Vec<String> {
    match Regex::new(r"(?i),?\s+then\s+") {
        Ok(re) => re.split(text).map(str::to_string).collect(),
        Err(_) => vec![text.to_string()],
    }
}

fn strip_list_marker(line: &str) -> Option<String> {
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim().to_string());
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(|r| r.trim().to_string())
}
