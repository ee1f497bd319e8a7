//! Action requests, tool results and the error taxonomy

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error kinds reported inside tool results and loop outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownTool,
    InvalidArguments,
    Denied,
    Timeout,
    Cancelled,
    TransportFailure,
    MalformedDecision,
    SessionBusy,
    UnknownTodo,
    /// Reserved: the context manager always reduces instead
    CapacityExceeded,
    ExecutionFailed,
    DepthExceeded,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A model-issued request to invoke a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// String value of an argument, if present
    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Denied,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Denied => "denied",
        }
    }
}

/// Normalized outcome of one action request.
///
/// `payload` holds the tool output on success and the human-readable error
/// detail or denial reason otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Outcome,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolResult {
    pub fn success(request: &ActionRequest, payload: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: Outcome::Success,
            payload: payload.into(),
            error_kind: None,
        }
    }

    pub fn error(request: &ActionRequest, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: Outcome::Error,
            payload: detail.into(),
            error_kind: Some(kind),
        }
    }

    pub fn denied(request: &ActionRequest, reason: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: Outcome::Denied,
            payload: reason.into(),
            error_kind: Some(ErrorKind::Denied),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// One entry of a session's tool-call history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Turn number (1-based) the call belongs to
    pub turn: u32,
    pub request: ActionRequest,
    pub result: ToolResult,
    pub finished_at: DateTime<Local>,
}

impl ToolCallRecord {
    pub fn new(turn: u32, request: ActionRequest, result: ToolResult) -> Self {
        Self {
            turn,
            request,
            result,
            finished_at: Local::now(),
        }
    }
}
