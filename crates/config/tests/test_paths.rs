//! Tests for path helpers

use std::path::Path;
use tempfile::TempDir;
use warden_config::paths::{init_project, GUIDELINE_FILE, STATE_DIR};
use warden_config::{config_path, data_dir, guideline_path, project_state_dir, sessions_dir, skills_dir};

#[test]
fn test_user_paths() {
    let data = data_dir();
    assert!(data.ends_with(STATE_DIR));
    assert_eq!(config_path(), data.join("config.json"));
}

#[test]
fn test_project_paths() {
    let root = Path::new("/work/project");
    assert_eq!(project_state_dir(root), Path::new("/work/project/.warden"));
    assert_eq!(sessions_dir(root), Path::new("/work/project/.warden/sessions"));
    assert_eq!(skills_dir(root), Path::new("/work/project/.warden/skills"));
    assert_eq!(guideline_path(root), root.join(GUIDELINE_FILE));
}

#[tokio::test]
async fn test_init_project_creates_layout() {
    let temp = TempDir::new().unwrap();
    let state = init_project(temp.path()).await.unwrap();

    assert_eq!(state, temp.path().join(".warden"));
    assert!(sessions_dir(temp.path()).is_dir());
    assert!(skills_dir(temp.path()).is_dir());

    // Idempotent
    init_project(temp.path()).await.unwrap();
}
