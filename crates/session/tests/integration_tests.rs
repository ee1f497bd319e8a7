//! Integration tests for warden-session
//!
//! Covers the store lifecycle: create, exclusive open, atomic save, load,
//! listing and lease recovery.

use warden_session::{
    ActionRequest, ContextSnapshot, PinKind, PinnedEntry, Session, SessionError, SessionStatus,
    SessionStore, TodoItem, TodoStatus, ToolCallRecord, ToolResult, Turn,
};

use serde_json::{json, Map};
use tempfile::TempDir;

fn populated_session(root: &std::path::Path) -> Session {
    let mut session = Session::new(root, "create file a.txt");

    let mut args = Map::new();
    args.insert("path".to_string(), json!("a.txt"));
    args.insert("content".to_string(), json!("X"));
    let request = ActionRequest::new("call_1", "write_file", args);
    let result = ToolResult::success(&request, "wrote 1 byte to a.txt");

    session.context = ContextSnapshot {
        pinned: vec![PinnedEntry {
            kind: PinKind::Task,
            content: "create file a.txt".to_string(),
        }],
        turns: vec![
            Turn::task("create file a.txt"),
            Turn::tool_result(&result, vec!["a.txt".to_string()]),
        ],
    };
    session.todos = vec![TodoItem {
        id: "1".to_string(),
        description: "create file a.txt".to_string(),
        status: TodoStatus::InProgress,
        parent_task_id: None,
    }];
    session.history = vec![ToolCallRecord::new(1, request, result)];
    session.turns_completed = 1;
    session
}

#[tokio::test]
async fn test_create_then_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path().join("sessions"));
    let session = populated_session(temp.path());

    let lease = store.create(&session).await.unwrap();
    assert_eq!(lease.session_id(), session.session_id);

    let loaded = store.load(&session.session_id).await.unwrap();
    assert_eq!(loaded, session);
}

#[tokio::test]
async fn test_open_is_exclusive() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());
    let session = Session::new(temp.path(), "task");

    let lease = store.create(&session).await.unwrap();

    match store.open(&session.session_id).await {
        Err(SessionError::Busy(id)) => assert_eq!(id, session.session_id),
        other => panic!("expected Busy, got {:?}", other.map(|(s, _)| s.session_id)),
    }

    drop(lease);
    let (reopened, _lease) = store.open(&session.session_id).await.unwrap();
    assert_eq!(reopened.session_id, session.session_id);
}

#[tokio::test]
async fn test_busy_open_does_not_mutate_state() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());
    let session = Session::new(temp.path(), "task");
    let _lease = store.create(&session).await.unwrap();

    let before = std::fs::read_to_string(
        store
            .sessions_dir()
            .join(format!("{}.json", session.session_id)),
    )
    .unwrap();
    assert!(store.open(&session.session_id).await.is_err());
    let after = std::fs::read_to_string(
        store
            .sessions_dir()
            .join(format!("{}.json", session.session_id)),
    )
    .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_open_missing_session() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());

    let result = store.open("does-not-exist").await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
    // The lease taken during the failed open is released again
    assert!(!store.is_open("does-not-exist").await);
}

#[tokio::test]
async fn test_save_overwrites_atomically() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());
    let mut session = Session::new(temp.path(), "task");
    let _lease = store.create(&session).await.unwrap();

    session.mark_aborted("iteration cap reached");
    store.save(&session).await.unwrap();

    let loaded = store.load(&session.session_id).await.unwrap();
    assert_eq!(loaded.status, SessionStatus::Aborted);
    assert_eq!(loaded.abort_reason.as_deref(), Some("iteration cap reached"));

    let leftovers: Vec<_> = std::fs::read_dir(store.sessions_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_list_sorted_by_update() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());

    let first = Session::with_id("first", temp.path(), "one");
    store.save(&first).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = Session::with_id("second", temp.path(), "two");
    store.save(&second).await.unwrap();

    let list = store.list().await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].session_id, "second");
    assert_eq!(list[1].session_id, "first");
}

#[tokio::test]
async fn test_break_lock() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());
    let session = Session::new(temp.path(), "task");
    let lease = store.create(&session).await.unwrap();
    // Simulate a crashed holder
    std::mem::forget(lease);

    assert!(store.is_open(&session.session_id).await);
    assert!(store.break_lock(&session.session_id).await.unwrap());
    assert!(!store.break_lock(&session.session_id).await.unwrap());

    let (_session, _lease) = store.open(&session.session_id).await.unwrap();
}

#[tokio::test]
async fn test_for_project_uses_state_dir() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::for_project(temp.path());
    assert_eq!(
        store.sessions_dir(),
        temp.path().join(".warden").join("sessions")
    );
    assert!(store.sessions_dir().exists());
}

#[tokio::test]
async fn test_invalid_id_rejected() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());
    assert!(matches!(
        store.load("../../etc/passwd").await,
        Err(SessionError::InvalidId(_))
    ));
}
