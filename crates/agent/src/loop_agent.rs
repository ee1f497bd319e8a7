//! Agent loop - the reason-act state machine
//!
//! One [`AgentLoop`] advances one session at a time through
//! `Planning -> AwaitingDecision -> Dispatching -> Updating -> Planning ...`
//! until the model gives a final answer (`Done`) or the run is aborted.
//! `AwaitingConfirmation` is entered while a call waits on the user.
//!
//! The session is saved after every completed turn, never in the middle of one.

use serde_json::json;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use warden_config::{guideline_path, Config};
use warden_provider::{chat_with_timeout, ChatParams, ChatResponse, Provider, Tool, ToolChoice};
use warden_session::{
    ActionRequest, CallMeta, ErrorKind, PinKind, Session, SessionLease, SessionStatus,
    SessionStore, TodoStatus, ToolCallRecord, ToolResult, Turn,
};

use crate::confirm::Confirmer;
use crate::context::{build_system_prompt, ContextLimits, ContextManager};
use crate::decision::{parse_decision, Decision};
use crate::dispatch::{DispatchLimits, Dispatcher};
use crate::guard::SafetyGuard;
use crate::todo::TodoManager;
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};

pub(crate) const TODO_ADD: &str = "todo_add";
pub(crate) const TODO_UPDATE: &str = "todo_update";
pub(crate) const DELEGATE: &str = "delegate";

const TRANSPORT_BACKOFF_MS: u64 = 500;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Phase of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Planning,
    AwaitingDecision,
    Dispatching,
    AwaitingConfirmation,
    Updating,
    Done,
    Aborted,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Planning => "planning",
            LoopState::AwaitingDecision => "awaiting_decision",
            LoopState::Dispatching => "dispatching",
            LoopState::AwaitingConfirmation => "awaiting_confirmation",
            LoopState::Updating => "updating",
            LoopState::Done => "done",
            LoopState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Done | LoopState::Aborted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Completed turns allowed per run or resume
    pub max_iterations: u32,
    /// Consecutive malformed decisions before the run aborts
    pub malformed_retry_budget: u32,
    /// Extra attempts for a retryable transport failure
    pub transport_retry_budget: u32,
    pub max_delegation_depth: u32,
    pub plan_first: bool,
    pub context: ContextLimits,
    pub dispatch: DispatchLimits,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            request_timeout_secs: config.provider.request_timeout_secs,
            max_iterations: config.agent.max_iterations,
            malformed_retry_budget: config.agent.malformed_retry_budget,
            transport_retry_budget: config.agent.transport_retry_budget,
            max_delegation_depth: config.agent.max_delegation_depth,
            plan_first: config.agent.plan_first,
            context: ContextLimits::from(&config.context),
            dispatch: DispatchLimits::from(&config.dispatch),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a run or resume ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub answer: Option<String>,
    pub abort_reason: Option<String>,
    /// Cause of an abort in the error taxonomy; `None` when the iteration cap was hit
    pub error_kind: Option<ErrorKind>,
    /// Turns completed during this invocation
    pub iterations: u32,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.status == SessionStatus::Done
    }
}

/// Moves the published state to `AwaitingConfirmation` while the user decides
struct TrackingConfirmer {
    inner: Arc<dyn Confirmer>,
    state: Arc<watch::Sender<LoopState>>,
}

#[async_trait]
impl Confirmer for TrackingConfirmer {
    async fn confirm(&self, request: &ActionRequest, reason: &str) -> bool {
        self.state.send_replace(LoopState::AwaitingConfirmation);
        debug!("Loop state: awaiting_confirmation ({})", request.call_id);
        let approved = self.inner.confirm(request, reason).await;
        self.state.send_replace(LoopState::Dispatching);
        approved
    }
}

/// Working state of one session inside [`AgentLoop::drive`]
pub(crate) struct RunState {
    pub session: Session,
    pub lease: SessionLease,
    pub context: ContextManager,
    pub todos: TodoManager,
}

/// The agent loop: owns the transport, the dispatcher and the session store
pub struct AgentLoop<P: Provider> {
    provider: Arc<P>,
    dispatcher: Arc<Dispatcher>,
    store: SessionStore,
    settings: LoopSettings,
    root: PathBuf,
    state: Arc<watch::Sender<LoopState>>,
    cancel: CancellationToken,
}

impl<P: Provider> AgentLoop<P> {
    pub fn new(
        provider: P,
        registry: ToolRegistry,
        confirmer: Arc<dyn Confirmer>,
        store: SessionStore,
        settings: LoopSettings,
        root: impl Into<PathBuf>,
    ) -> Self {
        let root = root.into();
        let (state, _) = watch::channel(LoopState::Planning);
        let state = Arc::new(state);
        let confirmer: Arc<dyn Confirmer> = Arc::new(TrackingConfirmer {
            inner: confirmer,
            state: Arc::clone(&state),
        });
        let dispatcher = Dispatcher::new(
            registry,
            SafetyGuard::new(&root),
            confirmer,
            settings.dispatch,
        );

        Self {
            provider: Arc::new(provider),
            dispatcher: Arc::new(dispatcher),
            store,
            settings,
            root,
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Current phase (of the innermost running session when delegating)
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Cancelling this token aborts the run: the in-flight model call and
    /// running tools are cancelled and the session is saved as aborted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        debug!("Loop state: {}", state);
        self.state.send_replace(state);
    }

    /// Start a new session for `task` and run it to a terminal state
    pub async fn run(&self, task: &str) -> Result<RunOutcome> {
        let session = Session::new(&self.root, task);
        info!("Starting session {}: {}", session.session_id, task);
        let run = self.open_new(session).await?;
        self.drive(run).await
    }

    /// Re-open an existing session, optionally with a follow-up instruction
    pub async fn resume(&self, session_id: &str, follow_up: Option<&str>) -> Result<RunOutcome> {
        let (mut session, lease) = self.store.open(session_id).await?;
        if session.status.is_terminal() {
            info!("Re-opening {} session {}", status_name(session.status), session_id);
            session.reopen();
        }

        let mut context = ContextManager::from_snapshot(self.settings.context, session.context.clone())
            .with_guideline(guideline_path(&self.root));
        if let Some(follow_up) = follow_up.map(str::trim).filter(|f| !f.is_empty()) {
            context.append(Turn::task(follow_up));
        }
        let todos = TodoManager::from_items(session.session_id.clone(), session.todos.clone());

        self.drive(RunState {
            session,
            lease,
            context,
            todos,
        })
        .await
    }

    /// Create `session` in the store with a fresh window and todo list
    pub(crate) async fn open_new(&self, session: Session) -> Result<RunState> {
        let lease = self.store.create(&session).await?;

        let mut context =
            ContextManager::new(self.settings.context).with_guideline(guideline_path(&self.root));
        context.pin(PinKind::Task, &session.task);
        context.append(Turn::task(session.task.clone()));

        let mut todos = TodoManager::new(session.session_id.clone());
        if self.settings.plan_first {
            todos.decompose(&session.task);
        } else {
            todos.seed_root(&session.task);
        }

        Ok(RunState {
            session,
            lease,
            context,
            todos,
        })
    }

    /// Run the state machine until the session is done or aborted. Boxed so a
    /// delegated child can be driven from inside its parent's turn.
    pub(crate) fn drive(&self, run: RunState) -> BoxFuture<'_, Result<RunOutcome>> {
        Box::pin(async move {
            let RunState {
                mut session,
                lease,
                mut context,
                mut todos,
            } = run;
            let mut iterations = 0u32;
            let mut malformed = 0u32;

            let outcome = loop {
                if self.cancel.is_cancelled() {
                    break self
                        .abort(&mut session, &context, &todos, "cancelled by user", Some(ErrorKind::Cancelled), iterations)
                        .await?;
                }
                if iterations >= self.settings.max_iterations {
                    let reason = format!("iteration cap of {} reached", self.settings.max_iterations);
                    break self
                        .abort(&mut session, &context, &todos, &reason, None, iterations)
                        .await?;
                }

                self.set_state(LoopState::Planning);
                context.refresh_guideline().await;
                if !todos.is_empty() {
                    context.pin(PinKind::Todos, &todos.summary());
                }
                let params = ChatParams {
                    model: self.settings.model.clone(),
                    messages: context.render(&build_system_prompt(&self.root, session.depth)),
                    tools: self.tool_definitions(session.depth),
                    max_tokens: self.settings.max_tokens,
                    temperature: self.settings.temperature,
                    tool_choice: ToolChoice::Auto,
                };

                self.set_state(LoopState::AwaitingDecision);
                debug!(
                    "Requesting decision for turn {} ({} messages, {} chars of context)",
                    session.turns_completed + 1,
                    params.messages.len(),
                    params.context_chars()
                );
                let response = match self.request_decision(params).await {
                    Ok(response) => response,
                    Err(AgentError::Cancelled) => continue,
                    Err(e) => {
                        let reason = e.to_string();
                        break self
                            .abort(&mut session, &context, &todos, &reason, Some(e.kind()), iterations)
                            .await?;
                    }
                };

                let turn_number = session.turns_completed + 1;
                match parse_decision(&response, turn_number) {
                    Decision::FinalAnswer(answer) => {
                        context.append(Turn::model(answer.clone(), Vec::new()));
                        session.mark_done(answer.clone());
                        self.persist(&mut session, &context, &todos).await?;
                        self.set_state(LoopState::Done);
                        info!(
                            "Session {} done after {} turns",
                            session.session_id, session.turns_completed
                        );
                        break RunOutcome {
                            session_id: session.session_id.clone(),
                            status: SessionStatus::Done,
                            answer: Some(answer),
                            abort_reason: None,
                            error_kind: None,
                            iterations,
                        };
                    }
                    Decision::Malformed(reason) => {
                        malformed += 1;
                        warn!(
                            "Malformed decision {}/{} in {}: {}",
                            malformed, self.settings.malformed_retry_budget, session.session_id, reason
                        );
                        if malformed >= self.settings.malformed_retry_budget {
                            let reason = format!(
                                "{} consecutive malformed decisions, last: {}",
                                malformed, reason
                            );
                            break self
                                .abort(&mut session, &context, &todos, &reason, Some(ErrorKind::MalformedDecision), iterations)
                                .await?;
                        }
                        context.append(Turn::note(format!(
                            "Your last reply could not be used ({}). Call a tool, or reply with the final answer as plain text.",
                            reason
                        )));
                    }
                    Decision::Actions { text, requests } => {
                        malformed = 0;
                        self.set_state(LoopState::Dispatching);
                        let results = self.execute_turn(&session, &mut todos, &requests).await;

                        self.set_state(LoopState::Updating);
                        let calls = requests.iter().map(|r| self.call_meta(r)).collect();
                        context.append(Turn::model(text.unwrap_or_default(), calls));
                        for (request, result) in requests.into_iter().zip(results) {
                            let paths = self.declared_paths(&request);
                            context.append(Turn::tool_result(&result, paths));
                            session
                                .history
                                .push(ToolCallRecord::new(turn_number, request, result));
                        }
                        session.turns_completed = turn_number;
                        iterations += 1;
                        self.persist(&mut session, &context, &todos).await?;
                    }
                }
            };

            drop(lease);
            Ok(outcome)
        })
    }

    /// Model call with retries for transient transport failures
    async fn request_decision(&self, params: ChatParams) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let call = chat_with_timeout(
                self.provider.as_ref(),
                params.clone(),
                self.settings.request_timeout_secs,
            );
            let result = tokio::select! {
                result = call => result,
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            };
            match result {
                Ok(response) => {
                    debug!(
                        "Model replied in {}ms ({} tool calls)",
                        started.elapsed().as_millis(),
                        response.tool_calls.len()
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.settings.transport_retry_budget => {
                    let backoff = Duration::from_millis(TRANSPORT_BACKOFF_MS << attempt);
                    attempt += 1;
                    warn!(
                        "Model call failed ({}), retry {}/{} in {}ms",
                        e,
                        attempt,
                        self.settings.transport_retry_budget,
                        backoff.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    }
                }
                Err(e) => return Err(AgentError::Transport(e.to_string())),
            }
        }
    }

    /// Dispatch registered tools as one batch while control actions run in
    /// issue order alongside; results come back in issue order.
    async fn execute_turn(
        &self,
        session: &Session,
        todos: &mut TodoManager,
        requests: &[ActionRequest],
    ) -> Vec<ToolResult> {
        let (controls, tools): (Vec<(usize, &ActionRequest)>, Vec<(usize, &ActionRequest)>) =
            requests
                .iter()
                .enumerate()
                .partition(|(_, r)| is_control(&r.tool_name));

        let batch: Vec<ActionRequest> = tools.iter().map(|(_, r)| (*r).clone()).collect();
        let (dispatched, controlled) = tokio::join!(
            self.dispatcher.dispatch_batch(batch, self.cancel.clone()),
            self.run_controls(session, todos, &controls),
        );

        let mut slots: Vec<Option<ToolResult>> = vec![None; requests.len()];
        for ((index, _), result) in tools.iter().zip(dispatched) {
            slots[*index] = Some(result);
        }
        for (index, result) in controlled {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(request, ErrorKind::ExecutionFailed, "no result produced")
                })
            })
            .collect()
    }

    async fn run_controls(
        &self,
        session: &Session,
        todos: &mut TodoManager,
        controls: &[(usize, &ActionRequest)],
    ) -> Vec<(usize, ToolResult)> {
        let mut delegations = session
            .history
            .iter()
            .filter(|record| record.request.tool_name == DELEGATE)
            .count();
        let mut results = Vec::with_capacity(controls.len());

        for (index, request) in controls {
            let started = Instant::now();
            let result = if self.cancel.is_cancelled() {
                ToolResult::error(request, ErrorKind::Cancelled, "cancelled before completion")
            } else {
                match request.tool_name.as_str() {
                    TODO_ADD => todo_add(todos, request),
                    TODO_UPDATE => todo_update(todos, request),
                    _ => {
                        delegations += 1;
                        self.delegate(session, delegations, request).await
                    }
                }
            };
            info!(
                tool = %request.tool_name,
                call_id = %request.call_id,
                tier = "control",
                outcome = result.outcome.as_str(),
                error_kind = ?result.error_kind,
                duration_ms = started.elapsed().as_millis() as u64,
                "tool call"
            );
            results.push((*index, result));
        }
        results
    }

    async fn abort(
        &self,
        session: &mut Session,
        context: &ContextManager,
        todos: &TodoManager,
        reason: &str,
        kind: Option<ErrorKind>,
        iterations: u32,
    ) -> Result<RunOutcome> {
        warn!("Aborting session {}: {}", session.session_id, reason);
        session.mark_aborted(reason);
        self.persist(session, context, todos).await?;
        self.set_state(LoopState::Aborted);
        Ok(RunOutcome {
            session_id: session.session_id.clone(),
            status: SessionStatus::Aborted,
            answer: None,
            abort_reason: Some(reason.to_string()),
            error_kind: kind,
            iterations,
        })
    }

    async fn persist(
        &self,
        session: &mut Session,
        context: &ContextManager,
        todos: &TodoManager,
    ) -> Result<()> {
        session.context = context.snapshot();
        session.todos = todos.items().to_vec();
        session.touch();
        self.store.save(session).await?;
        Ok(())
    }

    fn tool_definitions(&self, depth: u32) -> Vec<Tool> {
        let mut tools = self.dispatcher.definitions();
        tools.extend(control_definitions(depth < self.settings.max_delegation_depth));
        tools
    }

    fn declared_paths(&self, request: &ActionRequest) -> Vec<String> {
        self.dispatcher
            .registry()
            .descriptor(&request.tool_name)
            .map(|d| d.declared_paths(&request.arguments))
            .unwrap_or_default()
    }

    fn call_meta(&self, request: &ActionRequest) -> CallMeta {
        CallMeta {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            arguments: Some(serde_json::Value::Object(request.arguments.clone())),
            outcome: None,
            error_kind: None,
            paths: self.declared_paths(request),
        }
    }
}

fn status_name(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Open => "open",
        SessionStatus::Done => "done",
        SessionStatus::Aborted => "aborted",
    }
}

pub(crate) fn is_control(name: &str) -> bool {
    matches!(name, TODO_ADD | TODO_UPDATE | DELEGATE)
}

/// Definitions of the actions the loop handles itself
fn control_definitions(can_delegate: bool) -> Vec<Tool> {
    let mut tools = vec![
        Tool::new(
            TODO_ADD,
            "Add an item to the todo list.",
            json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string", "description": "What needs doing"},
                    "parent": {"type": "string", "description": "Id of the item this one belongs to"}
                },
                "required": ["description"]
            }),
        ),
        Tool::new(
            TODO_UPDATE,
            "Change the status of a todo item. Status only moves forward, except blocked back to pending.",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Todo item id"},
                    "status": {"type": "string", "enum": ["pending", "in_progress", "done", "blocked"]}
                },
                "required": ["id", "status"]
            }),
        ),
    ];
    if can_delegate {
        tools.push(Tool::new(
            DELEGATE,
            "Hand a self-contained sub-task to a sub-agent and wait for its answer.",
            json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Complete description of the sub-task"}
                },
                "required": ["task"]
            }),
        ));
    }
    tools
}

fn todo_add(todos: &mut TodoManager, request: &ActionRequest) -> ToolResult {
    let Some(description) = request.str_arg("description") else {
        return ToolResult::error(
            request,
            ErrorKind::InvalidArguments,
            "missing required field: description",
        );
    };
    match todos.add(description, request.str_arg("parent")) {
        Ok(item) => ToolResult::success(request, format!("added todo {}: {}", item.id, item.description)),
        Err(e) => ToolResult::error(request, e.kind(), e.to_string()),
    }
}

fn todo_update(todos: &mut TodoManager, request: &ActionRequest) -> ToolResult {
    let (Some(id), Some(status)) = (request.str_arg("id"), request.str_arg("status")) else {
        return ToolResult::error(
            request,
            ErrorKind::InvalidArguments,
            "todo_update needs id and status",
        );
    };
    let Some(status) = TodoStatus::parse(status) else {
        return ToolResult::error(
            request,
            ErrorKind::InvalidArguments,
            format!("unknown status: {}", status),
        );
    };
    match todos.update(id, status) {
        Ok(item) => ToolResult::success(
            request,
            format!("todo {} is now {}", item.id, item.status.marker()),
        ),
        Err(e) => ToolResult::error(request, e.kind(), e.to_string()),
    }
}
