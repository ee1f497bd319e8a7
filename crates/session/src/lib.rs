//! Session persistence for agent runs
//!
//! A [`Session`] is the full persisted state of one task: the context window
//! snapshot, the todo list and the tool-call history. [`SessionStore`] saves
//! sessions atomically as JSON and hands out exclusive [`SessionLease`]s so that
//! only one loop controller can hold a session open at a time.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub mod record;
pub mod todo;
pub mod turn;

pub use record::{ActionRequest, ErrorKind, Outcome, ToolCallRecord, ToolResult};
pub use todo::{TodoItem, TodoStatus};
pub use turn::{CallMeta, ContextSnapshot, PinKind, PinnedEntry, Role, Turn, TurnContent};

/// Directory (under the project root) holding per-project state
pub const STATE_DIR: &str = ".warden";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session data error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session {0} is already open")]
    Busy(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("invalid session id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Done,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

/// Persisted state of one task's agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_root: PathBuf,
    pub task: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub abort_reason: Option<String>,
    /// Parent session for delegated runs
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depth: u32,
    /// Completed turns over the session's lifetime
    #[serde(default)]
    pub turns_completed: u32,
    #[serde(default)]
    pub context: ContextSnapshot,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub history: Vec<ToolCallRecord>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Create a fresh open session with a generated id
    pub fn new(project_root: impl AsRef<Path>, task: impl Into<String>) -> Self {
        Self::with_id(generate_id(), project_root, task)
    }

    pub fn with_id(
        session_id: impl Into<String>,
        project_root: impl AsRef<Path>,
        task: impl Into<String>,
    ) -> Self {
        let now = Local::now();
        Self {
            session_id: session_id.into(),
            project_root: project_root.as_ref().to_path_buf(),
            task: task.into(),
            status: SessionStatus::Open,
            final_answer: None,
            abort_reason: None,
            parent_id: None,
            depth: 0,
            turns_completed: 0,
            context: ContextSnapshot::default(),
            todos: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Child session for a delegated sub-task
    pub fn child(parent: &Session, index: usize, task: impl Into<String>) -> Self {
        let mut child = Self::with_id(
            format!("{}.{}", parent.session_id, index),
            &parent.project_root,
            task,
        );
        child.parent_id = Some(parent.session_id.clone());
        child.depth = parent.depth + 1;
        child
    }

    pub fn mark_done(&mut self, answer: impl Into<String>) {
        self.status = SessionStatus::Done;
        self.final_answer = Some(answer.into());
        self.abort_reason = None;
        self.touch();
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Aborted;
        self.abort_reason = Some(reason.into());
        self.touch();
    }

    /// Re-open a closed session for an explicit resume
    pub fn reopen(&mut self) {
        self.status = SessionStatus::Open;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Local::now();
    }
}

/// Listing entry for `SessionStore::list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub task: String,
    pub turns_completed: u32,
    pub updated_at: DateTime<Local>,
}

fn generate_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &uuid[..8])
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}

/// Exclusive hold on an open session; released on drop
#[derive(Debug)]
pub struct SessionLease {
    session_id: String,
    lock_path: PathBuf,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!("Failed to release lease for {}: {}", self.session_id, e);
        } else {
            debug!("Released lease for {}", self.session_id);
        }
    }
}

/// Stores sessions as `<id>.json` with `<id>.lock` marking an open holder
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&sessions_dir).ok();
        Self { sessions_dir }
    }

    /// Store for a project: `<root>/.warden/sessions`
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(project_root.as_ref().join(STATE_DIR).join("sessions"))
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.lock", id))
    }

    /// Take the exclusive lease for `id`, failing with `Busy` if it is held
    pub async fn acquire(&self, id: &str) -> Result<SessionLease> {
        validate_id(id)?;
        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        let lock_path = self.lock_path(id);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(_) => {
                tokio::fs::write(&lock_path, std::process::id().to_string()).await?;
                debug!("Acquired lease for {}", id);
                Ok(SessionLease {
                    session_id: id.to_string(),
                    lock_path,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SessionError::Busy(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a new session and hold it open
    pub async fn create(&self, session: &Session) -> Result<SessionLease> {
        let lease = self.acquire(&session.session_id).await?;
        self.save(session).await?;
        Ok(lease)
    }

    /// Open an existing session exclusively. Fails with `Busy` without touching
    /// any state when another holder has it open.
    pub async fn open(&self, id: &str) -> Result<(Session, SessionLease)> {
        let lease = self.acquire(id).await?;
        let session = self.load(id).await?;
        Ok((session, lease))
    }

    /// Read a session without taking the lease (inspection only)
    pub async fn load(&self, id: &str) -> Result<Session> {
        validate_id(id)?;
        let path = self.session_path(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let session = serde_json::from_str(&content)?;
        debug!("Loaded session: {}", id);
        Ok(session)
    }

    /// Write via a temp file and rename so a crash never leaves a torn file
    pub async fn save(&self, session: &Session) -> Result<()> {
        validate_id(&session.session_id)?;
        let path = self.session_path(&session.session_id);
        let tmp = self
            .sessions_dir
            .join(format!(".{}.json.tmp", session.session_id));
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved session: {}", session.session_id);
        Ok(())
    }

    pub async fn is_open(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.lock_path(id))
            .await
            .unwrap_or(false)
    }

    /// Remove a stale lease left behind by a crashed process
    pub async fn break_lock(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let lock_path = self.lock_path(id);
        match tokio::fs::remove_file(&lock_path).await {
            Ok(()) => {
                warn!("Broke lease for session {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored sessions, most recently updated first
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.sessions_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(id) = name.strip_suffix(".json") else {
                    continue;
                };
                if id.starts_with('.') {
                    continue;
                }
                match self.load(id).await {
                    Ok(session) => summaries.push(SessionSummary {
                        session_id: session.session_id,
                        status: session.status,
                        task: session.task,
                        turns_completed: session.turns_completed,
                        updated_at: session.updated_at,
                    }),
                    Err(e) => warn!("Skipping unreadable session {}: {}", id, e),
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert!(validate_id(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_id_rejects_traversal() {
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id(".hidden").is_err());
        assert!(validate_id("20260101-000000-abcd1234.1").is_ok());
    }

    #[test]
    fn test_child_session_links_parent() {
        let parent = Session::with_id("root", "/tmp/project", "big task");
        let child = Session::child(&parent, 2, "small task");
        assert_eq!(child.session_id, "root.2");
        assert_eq!(child.parent_id.as_deref(), Some("root"));
        assert_eq!(child.depth, 1);
        assert_eq!(child.project_root, parent.project_root);
    }

    #[test]
    fn test_status_transitions() {
        let mut session = Session::new("/tmp/project", "task");
        assert!(!session.status.is_terminal());

        session.mark_aborted("max iterations");
        assert_eq!(session.status, SessionStatus::Aborted);
        assert!(session.status.is_terminal());

        session.reopen();
        assert_eq!(session.status, SessionStatus::Open);

        session.mark_done("finished");
        assert_eq!(session.final_answer.as_deref(), Some("finished"));
        assert!(session.abort_reason.is_none());
    }
}
