//! Warden command implementations

use anyhow::{Context, Result};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use warden_agent::tools::standard_registry;
use warden_agent::{confirmer_for, AgentLoop, LoopSettings, RunOutcome, TodoManager};
use warden_config::paths::init_project;
use warden_config::{self, Config, ConfirmMode};
use warden_provider::OpenAiProvider;
use warden_session::{SessionStatus, SessionStore};

/// Exit code of a run that ended aborted
const EXIT_ABORTED: i32 = 2;

/// `--yes` / `--deny` override of the configured confirmation mode
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmFlags {
    pub yes: bool,
    pub deny: bool,
}

impl ConfirmFlags {
    fn mode(self, configured: ConfirmMode) -> ConfirmMode {
        if self.yes {
            ConfirmMode::Approve
        } else if self.deny {
            ConfirmMode::Deny
        } else {
            configured
        }
    }
}

fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Read password from stdin (masked input)
fn read_password() -> Result<String> {
    match rpassword::read_password() {
        Ok(key) => Ok(key.trim().to_string()),
        Err(_) => read_line(),
    }
}

/// Initialize config and the project state directory
pub async fn init_command(project: PathBuf) -> Result<i32> {
    println!("◆ Initializing warden...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut config = warden_config::init()
        .await
        .context("failed to create config")?;

    if !config.has_api_key() && std::io::stdin().is_terminal() {
        print!("API key for {} (empty to skip): ", config.model());
        std::io::stdout().flush()?;
        let key = read_password()?;
        if !key.is_empty() {
            config.provider.api_key = key;
            config.save().await.context("failed to save config")?;
            println!("✓ API key saved");
        }
    }

    let state = init_project(&project)
        .await
        .with_context(|| format!("failed to create state directory in {}", project.display()))?;
    println!("✓ Project state at {}", state.display());

    let guideline = warden_config::guideline_path(&project);
    if !guideline.exists() {
        tokio::fs::write(&guideline, GUIDELINE_MD).await?;
        info!("◆ Created {}", guideline.display());
    }

    println!("\n◆ warden initialized");
    println!("\nNext steps:");
    println!("  1. Make sure an API key is set in {}", warden_config::config_path().display());
    println!("     or in the WARDEN_API_KEY environment variable");
    println!("  2. Edit {} with your project conventions", guideline.display());
    println!("  3. Run a task: warden run \"add a README\"");

    Ok(0)
}

async fn project_root(project: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(project)
        .await
        .with_context(|| format!("project directory {} not found", project.display()))
}

async fn build_agent(
    root: &Path,
    config: &Config,
    plan: bool,
    flags: ConfirmFlags,
) -> Result<AgentLoop<OpenAiProvider>> {
    let api_key = config
        .api_key()
        .context("No API key configured. Run `warden init` or set WARDEN_API_KEY")?;
    let provider = OpenAiProvider::with_timeout(
        api_key,
        config.api_base(),
        Some(config.model()),
        config.provider.request_timeout_secs,
    );

    let mut settings = LoopSettings::from_config(config);
    settings.plan_first |= plan;

    init_project(root).await?;
    let registry = standard_registry(
        root,
        &warden_config::skills_dir(root),
        config.context.max_turn_chars,
    )
    .await;
    debug!("Registered tools: {:?}", registry.names());

    let confirmer = confirmer_for(flags.mode(config.safety.confirm));
    Ok(AgentLoop::new(
        provider,
        registry,
        confirmer,
        SessionStore::for_project(root),
        settings,
        root,
    ))
}

/// Ctrl-C becomes a user-initiated abort
fn cancel_on_ctrl_c(agent: &AgentLoop<OpenAiProvider>) {
    let token = agent.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting after the current step");
            token.cancel();
        }
    });
}

fn report(outcome: &RunOutcome) -> i32 {
    match outcome.status {
        SessionStatus::Done => {
            println!("\n◆ {}", outcome.answer.as_deref().unwrap_or_default());
            println!("\n(session {}, {} turns)", outcome.session_id, outcome.iterations);
            0
        }
        _ => {
            let reason = outcome.abort_reason.as_deref().unwrap_or("unknown reason");
            match outcome.error_kind {
                Some(kind) => println!("\n✗ Aborted ({}): {}", kind, reason),
                None => println!("\n✗ Aborted: {}", reason),
            }
            println!("Resume with: warden resume {}", outcome.session_id);
            EXIT_ABORTED
        }
    }
}

/// Run a task to completion
pub async fn run_command(task: String, project: PathBuf, plan: bool, flags: ConfirmFlags) -> Result<i32> {
    if task.trim().is_empty() {
        anyhow::bail!("task must not be empty");
    }
    let config = Config::load().await?;
    let root = project_root(&project).await?;
    let agent = build_agent(&root, &config, plan, flags).await?;
    cancel_on_ctrl_c(&agent);

    let outcome = agent.run(&task).await?;
    Ok(report(&outcome))
}

/// Resume a stored session, optionally with a follow-up instruction
pub async fn resume_command(
    id: String,
    message: Option<String>,
    project: PathBuf,
    flags: ConfirmFlags,
) -> Result<i32> {
    let config = Config::load().await?;
    let root = project_root(&project).await?;
    let agent = build_agent(&root, &config, false, flags).await?;
    cancel_on_ctrl_c(&agent);

    let outcome = agent
        .resume(&id, message.as_deref())
        .await
        .with_context(|| format!("cannot resume session {}", id))?;
    Ok(report(&outcome))
}

/// List sessions of a project
pub async fn sessions_command(project: PathBuf) -> Result<i32> {
    let root = project_root(&project).await?;
    let sessions = SessionStore::for_project(&root).list().await;

    if sessions.is_empty() {
        println!("No sessions in {}", root.display());
        return Ok(0);
    }

    println!("Sessions in {}:", root.display());
    for summary in sessions {
        println!(
            "  {}  {:<7} {:>3} turns  {}  {}",
            summary.session_id,
            status_label(summary.status),
            summary.turns_completed,
            summary.updated_at.format("%Y-%m-%d %H:%M"),
            first_line(&summary.task, 60)
        );
    }
    Ok(0)
}

/// Show a stored session
pub async fn show_command(id: String, project: PathBuf) -> Result<i32> {
    let root = project_root(&project).await?;
    let store = SessionStore::for_project(&root);
    let session = store
        .load(&id)
        .await
        .with_context(|| format!("cannot load session {}", id))?;

    println!("◆ Session {}", session.session_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Task:     {}", session.task);
    println!("Status:   {}", status_label(session.status));
    if let Some(parent) = &session.parent_id {
        println!("Parent:   {} (depth {})", parent, session.depth);
    }
    println!("Turns:    {}", session.turns_completed);
    println!("Updated:  {}", session.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if store.is_open(&session.session_id).await {
        println!("Lease:    [Held]");
    }

    if !session.todos.is_empty() {
        let todos = TodoManager::from_items(session.session_id.clone(), session.todos.clone());
        println!("\nTodo:\n{}", todos.summary());
    }

    if !session.history.is_empty() {
        println!("\nTool calls:");
        for record in &session.history {
            let kind = record
                .result
                .error_kind
                .map(|k| format!(" ({})", k))
                .unwrap_or_default();
            println!(
                "  [{}] {} {} -> {}{}",
                record.turn,
                record.request.call_id,
                record.request.tool_name,
                record.result.outcome.as_str(),
                kind
            );
        }
    }

    if let Some(answer) = &session.final_answer {
        println!("\nAnswer:\n{}", answer);
    }
    if let Some(reason) = &session.abort_reason {
        println!("\nAbort reason: {}", reason);
    }
    Ok(0)
}

/// Release a stale session lease
pub async fn unlock_command(id: String, project: PathBuf) -> Result<i32> {
    let root = project_root(&project).await?;
    let store = SessionStore::for_project(&root);
    if store.break_lock(&id).await? {
        println!("✓ Lease on {} released", id);
    } else {
        println!("Session {} was not locked", id);
    }
    Ok(0)
}

/// Show system status
pub async fn status_command() -> Result<i32> {
    let config_path = warden_config::config_path();

    println!("◆ warden Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:   {} {}",
        config_path.display(),
        if config_path.exists() { "[OK]" } else { "[Missing]" }
    );

    let config = Config::load().await?;
    println!("Model:    {}", config.model());
    println!(
        "API Key:  {}",
        if config.has_api_key() { "[Set]" } else { "[Missing]" }
    );
    println!("Confirm:  {:?}", config.safety.confirm);
    println!(
        "Limits:   {} iterations, delegation depth {}",
        config.agent.max_iterations, config.agent.max_delegation_depth
    );

    let cwd = std::env::current_dir()?;
    let state = warden_config::project_state_dir(&cwd);
    println!(
        "Project:  {} {}",
        state.display(),
        if state.exists() { "[OK]" } else { "[Missing]" }
    );

    println!("\n◆ Ready");
    Ok(0)
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Open => "open",
        SessionStatus::Done => "done",
        SessionStatus::Aborted => "aborted",
    }
}

fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

const GUIDELINE_MD: &str = r#"# Project Guidelines

Warden re-reads this file before every step. Keep it short.

## Conventions

- Describe the build and test commands of this project here
- Note files or directories that must not be touched
"#;
