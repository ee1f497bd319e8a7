//! End-to-end tests of the agent loop against a mocked model transport

use async_trait::async_trait;
use mockall::{mock, Sequence};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use warden_agent::tools::register_default_tools;
use warden_agent::{AgentLoop, AutoDeny, LoopSettings, LoopState, ToolRegistry};
use warden_provider::{ChatParams, ChatResponse, Provider, ProviderError, ToolCall};
use warden_session::{ErrorKind, Outcome, Session, SessionStatus, SessionStore, TodoStatus};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

fn settings() -> LoopSettings {
    let mut settings = LoopSettings::default();
    settings.model = "test-model".to_string();
    settings
}

fn agent(root: &Path, provider: MockProvider, settings: LoopSettings) -> AgentLoop<MockProvider> {
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, root, 10_000);
    AgentLoop::new(
        provider,
        registry,
        Arc::new(AutoDeny),
        SessionStore::for_project(root),
        settings,
        root,
    )
}

fn call(id: &str, name: &str, arguments: Value) -> ChatResponse {
    ChatResponse::with_tool_calls(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }])
}

fn system_prompt(params: &ChatParams) -> String {
    params.messages[0].content.clone().unwrap_or_default()
}

fn last_content(params: &ChatParams) -> String {
    params
        .messages
        .last()
        .and_then(|m| m.content.clone())
        .unwrap_or_default()
}

fn tool_names(params: &ChatParams) -> Vec<String> {
    params.tools.iter().map(|t| t.function.name.clone()).collect()
}

#[tokio::test]
async fn test_create_file_then_final_answer() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();

    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert_eq!(params.model, "test-model");
            assert_eq!(params.messages[1].role, "user");
            assert_eq!(
                params.messages[1].content.as_deref(),
                Some("create file a.txt with content X")
            );
            Ok(call("call_1", "write_file", json!({"path": "a.txt", "content": "X"})))
        });
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let last = params.messages.last().unwrap();
            assert_eq!(last.role, "tool");
            assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
            assert_eq!(last.content.as_deref(), Some("wrote 1 bytes to a.txt"));
            Ok(ChatResponse::text("Created a.txt."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("create file a.txt with content X").await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(outcome.answer.as_deref(), Some("Created a.txt."));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(agent.state(), LoopState::Done);
    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "X");

    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Done);
    assert_eq!(session.final_answer.as_deref(), Some("Created a.txt."));
    assert_eq!(session.turns_completed, 1);
    assert_eq!(session.history.len(), 1);
    assert_eq!(session.history[0].result.outcome, Outcome::Success);
    assert!(!agent.store().is_open(&outcome.session_id).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_destructive_command_denied_without_side_effects() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("keep.txt"), "data").unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();

    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(call("call_1", "exec", json!({"command": "rm -rf ."}))));
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let last = last_content(&params);
            assert!(last.starts_with("[denied] "), "got: {}", last);
            assert!(last.contains("recursive deletion of the project root"));
            Ok(ChatResponse::text("I will not delete the project."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("clean everything up").await.unwrap();

    assert!(outcome.is_done());
    assert!(temp_dir.path().join("keep.txt").exists());
    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.history[0].result.outcome, Outcome::Denied);
    assert_eq!(session.history[0].result.error_kind, Some(ErrorKind::Denied));
}

#[tokio::test]
async fn test_iteration_cap_aborts_and_persists_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(3)
        .returning(|_| Ok(call("", "list_dir", json!({"path": "."}))));

    let mut settings = settings();
    settings.max_iterations = 3;
    let agent = agent(temp_dir.path(), mock, settings);
    let outcome = agent.run("look around forever").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.error_kind, None);
    assert!(outcome.abort_reason.unwrap().contains("iteration cap of 3"));
    assert_eq!(agent.state(), LoopState::Aborted);

    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(session.turns_completed, 3);
    assert_eq!(session.history.len(), 3);
    // task turn plus a model turn and a result turn per completed turn
    assert_eq!(session.context.turns.len(), 7);
    let ids: Vec<&str> = session
        .history
        .iter()
        .map(|r| r.request.call_id.as_str())
        .collect();
    assert_eq!(ids, vec!["call_1_0", "call_2_0", "call_3_0"]);
}

#[tokio::test]
async fn test_malformed_decisions_exhaust_budget() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(3)
        .returning(|_| Ok(ChatResponse::text("   ")));

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("do something").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::MalformedDecision));
    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.turns_completed, 0);
}

#[tokio::test]
async fn test_malformed_decision_is_retried_with_note() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ChatResponse::text("```json\n{\"action\": \"list_dir\", \n```")));
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let last = last_content(&params);
            assert!(last.starts_with("[note] Your last reply could not be used"));
            Ok(ChatResponse::text("Done."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    assert!(agent.run("list files").await.unwrap().is_done());
}

#[tokio::test]
async fn test_transport_failure_aborts() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::Api("invalid api key".to_string())));

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("anything").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::TransportFailure));
    assert!(outcome.abort_reason.unwrap().contains("invalid api key"));
}

#[tokio::test(start_paused = true)]
async fn test_retryable_transport_failure_is_retried() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_| Err(ProviderError::RateLimited));
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ChatResponse::text("Recovered.")));

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("anything").await.unwrap();
    assert_eq!(outcome.answer.as_deref(), Some("Recovered."));
}

#[tokio::test]
async fn test_resume_open_session_is_busy() {
    let temp_dir = TempDir::new().unwrap();
    let store = SessionStore::for_project(temp_dir.path());
    let session = Session::new(temp_dir.path(), "held elsewhere");
    let _lease = store.create(&session).await.unwrap();

    let agent = agent(temp_dir.path(), MockProvider::new(), settings());
    let err = agent.resume(&session.session_id, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SessionBusy);
    let stored = store.load(&session.session_id).await.unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn test_resume_reopens_closed_session() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ChatResponse::text("First answer.")));
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let contents: Vec<String> = params
                .messages
                .iter()
                .filter_map(|m| m.content.clone())
                .collect();
            assert!(contents.iter().any(|c| c == "First answer."));
            assert_eq!(last_content(&params), "Now also add a README");
            Ok(ChatResponse::text("Second answer."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    let first = agent.run("start the project").await.unwrap();
    let second = agent
        .resume(&first.session_id, Some("Now also add a README"))
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.answer.as_deref(), Some("Second answer."));
    let session = agent.store().load(&first.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Done);
    assert_eq!(session.final_answer.as_deref(), Some("Second answer."));
}

#[tokio::test]
async fn test_delegation_returns_child_answer() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();

    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(tool_names(&params).contains(&"delegate".to_string()));
            Ok(call("d1", "delegate", json!({"task": "write b.txt containing B"})))
        });
    // child
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(system_prompt(&params).contains("sub-agent"));
            assert!(!tool_names(&params).contains(&"delegate".to_string()));
            Ok(call("w1", "write_file", json!({"path": "b.txt", "content": "B"})))
        });
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ChatResponse::text("b.txt written")));
    // parent again
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let last = last_content(&params);
            assert!(last.contains("b.txt written"), "got: {}", last);
            Ok(ChatResponse::text("Delegated and done."))
        });

    let mut settings = settings();
    settings.max_delegation_depth = 1;
    let agent = agent(temp_dir.path(), mock, settings);
    let outcome = agent.run("get b.txt written").await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(fs::read_to_string(temp_dir.path().join("b.txt")).unwrap(), "B");

    let child_id = format!("{}.1", outcome.session_id);
    let child = agent.store().load(&child_id).await.unwrap();
    assert_eq!(child.status, SessionStatus::Done);
    assert_eq!(child.parent_id.as_deref(), Some(outcome.session_id.as_str()));
    assert_eq!(child.depth, 1);
    assert_eq!(child.task, "write b.txt containing B");

    let parent = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(parent.history[0].result.outcome, Outcome::Success);
}

#[tokio::test]
async fn test_delegation_beyond_depth_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(!tool_names(&params).contains(&"delegate".to_string()));
            Ok(call("d1", "delegate", json!({"task": "anything"})))
        });
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(last_content(&params).contains("DepthExceeded"));
            Ok(ChatResponse::text("Did it myself."))
        });

    let mut settings = settings();
    settings.max_delegation_depth = 0;
    let agent = agent(temp_dir.path(), mock, settings);
    let outcome = agent.run("task").await.unwrap();

    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(
        session.history[0].result.error_kind,
        Some(ErrorKind::DepthExceeded)
    );
}

#[tokio::test]
async fn test_todo_controls_update_pinned_list() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(system_prompt(&params).contains("[ ] 1. ship the release"));
            Ok(ChatResponse::with_tool_calls(vec![
                ToolCall {
                    id: "t1".to_string(),
                    name: "todo_add".to_string(),
                    arguments: json!({"description": "write changelog", "parent": "1"}),
                },
                ToolCall {
                    id: "t2".to_string(),
                    name: "todo_update".to_string(),
                    arguments: json!({"id": "1", "status": "in_progress"}),
                },
                ToolCall {
                    id: "t3".to_string(),
                    name: "todo_update".to_string(),
                    arguments: json!({"id": "42", "status": "done"}),
                },
            ]))
        });
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let system = system_prompt(&params);
            assert!(system.contains("[~] 1. ship the release"));
            assert!(system.contains("  [ ] 2. write changelog"));
            Ok(ChatResponse::text("Release in progress."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    let outcome = agent.run("ship the release").await.unwrap();

    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.todos.len(), 2);
    assert_eq!(session.todos[0].status, TodoStatus::InProgress);
    let kinds: Vec<Option<ErrorKind>> = session
        .history
        .iter()
        .map(|r| r.result.error_kind)
        .collect();
    assert_eq!(kinds, vec![None, None, Some(ErrorKind::UnknownTodo)]);
}

#[tokio::test]
async fn test_plan_first_decomposes_task() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    mock.expect_chat().times(1).returning(|params| {
        let system = system_prompt(&params);
        assert!(system.contains("[ ] 1. create a.txt"));
        assert!(system.contains("[ ] 2. create b.txt"));
        Ok(ChatResponse::text("Planned."))
    });

    let mut settings = settings();
    settings.plan_first = true;
    let agent = agent(temp_dir.path(), mock, settings);
    let outcome = agent.run("create a.txt, then create b.txt").await.unwrap();

    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.todos.len(), 2);
}

#[tokio::test]
async fn test_guideline_is_reread_every_turn() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("WARDEN.md"), "Use tabs.").unwrap();
    let mut mock = MockProvider::new();
    let mut seq = Sequence::new();
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            assert!(system_prompt(&params).contains("Use tabs."));
            Ok(call(
                "w1",
                "write_file",
                json!({"path": "WARDEN.md", "content": "Use spaces."}),
            ))
        });
    mock.expect_chat()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|params| {
            let system = system_prompt(&params);
            assert!(system.contains("Use spaces."));
            assert!(!system.contains("Use tabs."));
            Ok(ChatResponse::text("Switched."))
        });

    let agent = agent(temp_dir.path(), mock, settings());
    assert!(agent.run("switch indentation").await.unwrap().is_done());
}

#[tokio::test]
async fn test_user_cancel_aborts_before_model_call() {
    let temp_dir = TempDir::new().unwrap();
    let mut mock = MockProvider::new();
    mock.expect_chat().times(0);

    let agent = agent(temp_dir.path(), mock, settings());
    agent.cancellation_token().cancel();
    let outcome = agent.run("never runs").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Cancelled));
    let session = agent.store().load(&outcome.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(session.abort_reason.as_deref(), Some("cancelled by user"));
}
