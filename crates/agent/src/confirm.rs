//! User confirmation channel
//!
//! Consulted only when the safety guard answers `RequireConfirmation`. Only
//! the call waiting for an answer is blocked; other calls of the turn keep
//! running.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

use warden_config::ConfirmMode;
use warden_session::ActionRequest;

#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Whether `request` may run despite `reason`
    async fn confirm(&self, request: &ActionRequest, reason: &str) -> bool;
}

/// Approves everything (`--yes`)
pub struct AutoApprove;

#[async_trait]
impl Confirmer for AutoApprove {
    async fn confirm(&self, request: &ActionRequest, reason: &str) -> bool {
        info!("Auto-approved {} ({}): {}", request.tool_name, request.call_id, reason);
        true
    }
}

/// Refuses everything (`--deny`, non-interactive runs)
pub struct AutoDeny;

#[async_trait]
impl Confirmer for AutoDeny {
    async fn confirm(&self, request: &ActionRequest, reason: &str) -> bool {
        info!("Auto-declined {} ({}): {}", request.tool_name, request.call_id, reason);
        false
    }
}

/// Asks on the terminal. Prompts from concurrent calls are shown one at a time.
pub struct StdinConfirmer {
    prompt_lock: Mutex<()>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        Self {
            prompt_lock: Mutex::new(()),
        }
    }
}

impl Default for StdinConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &ActionRequest, reason: &str) -> bool {
        let _guard = self.prompt_lock.lock().await;

        let arguments = serde_json::to_string(&request.arguments).unwrap_or_default();
        eprintln!();
        eprintln!("⚠ {} needs confirmation: {}", request.tool_name, reason);
        eprintln!("  arguments: {}", arguments);
        eprint!("  Allow? [y/N]: ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn confirmer_for(mode: ConfirmMode) -> Arc<dyn Confirmer> {
    match mode {
        ConfirmMode::Ask => Arc::new(StdinConfirmer::new()),
        ConfirmMode::Approve => Arc::new(AutoApprove),
        ConfirmMode::Deny => Arc::new(AutoDeny),
    }
}
