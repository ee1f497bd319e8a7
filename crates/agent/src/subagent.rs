//! Delegation to sub-agents
//!
//! A `delegate` action runs a child session through the same loop: same
//! project root and tools, its own context window and todo list. The parent's
//! call blocks until the child is done or aborted and gets its final answer
//! back as the tool result.

use tracing::{info, warn};

use warden_provider::Provider;
use warden_session::{ActionRequest, ErrorKind, Session, SessionStatus, ToolResult};

use crate::loop_agent::AgentLoop;
use crate::AgentError;

impl<P: Provider> AgentLoop<P> {
    /// Run `request`'s task as child number `index` of `parent`
    pub(crate) async fn delegate(
        &self,
        parent: &Session,
        index: usize,
        request: &ActionRequest,
    ) -> ToolResult {
        let max_depth = self.settings().max_delegation_depth;
        if parent.depth >= max_depth {
            let e = AgentError::DepthExceeded(max_depth);
            return ToolResult::error(request, e.kind(), e.to_string());
        }
        let Some(task) = request.str_arg("task").map(str::trim).filter(|t| !t.is_empty()) else {
            return ToolResult::error(
                request,
                ErrorKind::InvalidArguments,
                "missing required field: task",
            );
        };

        let child = Session::child(parent, index, task);
        let child_id = child.session_id.clone();
        info!(
            "Delegating to {} (depth {}): {}",
            child_id, child.depth, task
        );

        let run = match self.open_new(child).await {
            Ok(run) => run,
            Err(e) => {
                warn!("Failed to start sub-agent {}: {}", child_id, e);
                return ToolResult::error(request, e.kind(), e.to_string());
            }
        };

        match self.drive(run).await {
            Ok(outcome) if outcome.status == SessionStatus::Done => ToolResult::success(
                request,
                format!(
                    "sub-agent {} finished:\n{}",
                    child_id,
                    outcome.answer.unwrap_or_default()
                ),
            ),
            Ok(outcome) => ToolResult::error(
                request,
                outcome.error_kind.unwrap_or(ErrorKind::ExecutionFailed),
                format!(
                    "sub-agent {} aborted: {}",
                    child_id,
                    outcome.abort_reason.unwrap_or_default()
                ),
            ),
            Err(e) => {
                warn!("Sub-agent {} failed: {}", child_id, e);
                ToolResult::error(request, e.kind(), e.to_string())
            }
        }
    }
}
