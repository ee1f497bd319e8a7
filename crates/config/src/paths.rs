//! Path utilities

use std::path::{Path, PathBuf};

/// Name of the per-project state directory
pub const STATE_DIR: &str = ".warden";

/// Guideline document re-read at every planning phase
pub const GUIDELINE_FILE: &str = "WARDEN.md";

/// User data directory (~/.warden), falling back to the working directory
/// when no home directory can be located
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR)
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// `<project_root>/.warden`
pub fn project_state_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR)
}

pub fn sessions_dir(project_root: &Path) -> PathBuf {
    project_state_dir(project_root).join("sessions")
}

/// Skill definitions (`*.toml`)
pub fn skills_dir(project_root: &Path) -> PathBuf {
    project_state_dir(project_root).join("skills")
}

pub fn guideline_path(project_root: &Path) -> PathBuf {
    project_root.join(GUIDELINE_FILE)
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Create the per-project state layout
pub async fn init_project(project_root: &Path) -> std::io::Result<PathBuf> {
    let state = project_state_dir(project_root);
    ensure_dir(&sessions_dir(project_root)).await?;
    ensure_dir(&skills_dir(project_root)).await?;
    Ok(state)
}
