//! Todo items and their status transition rule

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TodoStatus {
    fn rank(&self) -> u8 {
        match self {
            TodoStatus::Pending => 0,
            TodoStatus::InProgress => 1,
            TodoStatus::Blocked => 2,
            TodoStatus::Done => 3,
        }
    }

    /// Transitions only move forward, except `blocked -> pending` for a retry.
    /// Re-asserting the current status is allowed.
    pub fn can_transition_to(&self, next: TodoStatus) -> bool {
        if *self == TodoStatus::Blocked && next == TodoStatus::Pending {
            return true;
        }
        next.rank() >= self.rank()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Some(TodoStatus::Pending),
            "in_progress" => Some(TodoStatus::InProgress),
            "done" | "completed" => Some(TodoStatus::Done),
            "blocked" => Some(TodoStatus::Blocked),
            _ => None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Done => "[x]",
            TodoStatus::Blocked => "[!]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub description: String,
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}
