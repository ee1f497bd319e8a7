//! Warden - an autonomous coding agent

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    init_command, resume_command, run_command, sessions_command, show_command, status_command,
    unlock_command, ConfirmFlags,
};

/// Warden - coding agent for your terminal
#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "◆ An autonomous coding agent for your terminal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and the project state directory
    Init {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Run a task to completion
    Run {
        /// Task description
        task: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Decompose the task into todo items first
        #[arg(long)]
        plan: bool,
        /// Approve every confirmation request
        #[arg(long, conflicts_with = "deny")]
        yes: bool,
        /// Decline every confirmation request
        #[arg(long)]
        deny: bool,
    },
    /// Resume a stored session
    Resume {
        /// Session ID
        id: String,
        /// Follow-up instruction
        #[arg(short, long)]
        message: Option<String>,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Approve every confirmation request
        #[arg(long, conflicts_with = "deny")]
        yes: bool,
        /// Decline every confirmation request
        #[arg(long)]
        deny: bool,
    },
    /// List sessions of a project
    Sessions {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Show a stored session
    Show {
        /// Session ID
        id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Release the lease of a session left open by a crashed run
    Unlock {
        /// Session ID
        id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Show system status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init { project } => init_command(project).await,
        Commands::Run {
            task,
            project,
            plan,
            yes,
            deny,
        } => run_command(task, project, plan, ConfirmFlags { yes, deny }).await,
        Commands::Resume {
            id,
            message,
            project,
            yes,
            deny,
        } => resume_command(id, message, project, ConfirmFlags { yes, deny }).await,
        Commands::Sessions { project } => sessions_command(project).await,
        Commands::Show { id, project } => show_command(id, project).await,
        Commands::Unlock { id, project } => unlock_command(id, project).await,
        Commands::Status => status_command().await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
