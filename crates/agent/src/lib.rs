//! Agent orchestration engine
//!
//! The [`AgentLoop`] drives a reason-act cycle against a [`Provider`]: it
//! assembles a bounded context window, asks the model for a decision, routes
//! the resulting action requests through the [`Dispatcher`] (which consults the
//! [`SafetyGuard`] before anything with side effects runs) and feeds the
//! results back until the model gives a final answer.
//!
//! [`Provider`]: warden_provider::Provider

use thiserror::Error;

use warden_config::ConfigError;
use warden_session::{ErrorKind, SessionError, TodoStatus};

pub mod confirm;
pub mod context;
pub mod decision;
pub mod dispatch;
pub mod guard;
pub mod loop_agent;
pub mod subagent;
pub mod todo;
pub mod tools;

pub use confirm::{confirmer_for, AutoApprove, AutoDeny, Confirmer, StdinConfirmer};
pub use context::{ContextLimits, ContextManager};
pub use decision::{parse_decision, Decision};
pub use dispatch::{DispatchLimits, Dispatcher};
pub use guard::{SafetyGuard, Verdict};
pub use loop_agent::{AgentLoop, LoopSettings, LoopState, RunOutcome};
pub use todo::TodoManager;
pub use tools::{Tier, ToolDescriptor, ToolRegistry, ToolTrait};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown todo: {0}")]
    UnknownTodo(String),

    #[error("todo {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: TodoStatus,
        to: TodoStatus,
    },

    #[error("delegation depth limit of {0} reached")]
    DepthExceeded(u32),

    #[error("model transport failed: {0}")]
    Transport(String),

    #[error("cancelled")]
    Cancelled,

    #[error("skill {name}: {reason}")]
    Skill { name: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Position of this error in the tool-result taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::UnknownTool(_) => ErrorKind::UnknownTool,
            AgentError::InvalidArguments(_) | AgentError::InvalidTransition { .. } => {
                ErrorKind::InvalidArguments
            }
            AgentError::UnknownTodo(_) => ErrorKind::UnknownTodo,
            AgentError::DepthExceeded(_) => ErrorKind::DepthExceeded,
            AgentError::Transport(_) => ErrorKind::TransportFailure,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Session(SessionError::Busy(_)) => ErrorKind::SessionBusy,
            AgentError::Skill { .. }
            | AgentError::Session(_)
            | AgentError::Config(_)
            | AgentError::Io(_) => ErrorKind::ExecutionFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
