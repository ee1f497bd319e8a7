//! Common test utilities for warden CLI tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated home directory plus a project directory
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub project_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".warden");
        let project_dir = temp_dir.path().join("project");

        std::fs::create_dir_all(&project_dir)?;

        Ok(Self {
            temp_dir,
            config_dir,
            project_dir,
        })
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }

    pub fn project_file(&self, name: &str) -> PathBuf {
        self.project_dir.join(name)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.project_dir.join(".warden").join("sessions")
    }

    /// Command with HOME pointed at the temp dir and no ambient credentials
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
        cmd.env("HOME", self.temp_dir.path());
        for var in [
            "WARDEN_API_KEY",
            "OPENAI_API_KEY",
            "WARDEN_API_BASE",
            "WARDEN_MODEL",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Config pointing the provider at `api_base`
    pub fn create_config(&self, api_base: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let config = serde_json::json!({
            "provider": {
                "api_key": "test-api-key",
                "api_base": api_base,
                "model": "test/model"
            },
            "safety": { "confirm": "deny" }
        });
        std::fs::write(
            self.config_file("config.json"),
            serde_json::to_string_pretty(&config)?,
        )?;
        Ok(())
    }

    /// Ids of the stored sessions
    pub fn session_ids(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.sessions_dir()) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_string_lossy()
                    .strip_suffix(".json")
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
