//! Configuration management for warden
//!
//! Settings live in `~/.warden/config.json`. Every field has a default, so a
//! missing file or a partial file both load cleanly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, guideline_path, project_state_dir, sessions_dir, skills_dir};

/// Environment variables consulted when the file leaves a value empty
pub const ENV_API_KEY: &str = "WARDEN_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_BASE: &str = "WARDEN_API_BASE";
pub const ENV_MODEL: &str = "WARDEN_MODEL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.1
}

fn default_request_timeout() -> u64 {
    120
}

/// Loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_malformed_retry_budget")]
    pub malformed_retry_budget: u32,
    #[serde(default = "default_transport_retry_budget")]
    pub transport_retry_budget: u32,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,
    /// Decompose the task into todo items when a session is created
    #[serde(default)]
    pub plan_first: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            malformed_retry_budget: default_malformed_retry_budget(),
            transport_retry_budget: default_transport_retry_budget(),
            max_delegation_depth: default_max_delegation_depth(),
            plan_first: false,
        }
    }
}

fn default_max_iterations() -> u32 {
    50
}

fn default_malformed_retry_budget() -> u32 {
    3
}

fn default_transport_retry_budget() -> u32 {
    2
}

fn default_max_delegation_depth() -> u32 {
    2
}

/// Context window sizing, measured in characters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,
    /// 0 means a quarter of the budget
    #[serde(default)]
    pub max_pinned_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            keep_recent_turns: default_keep_recent_turns(),
            max_turn_chars: default_max_turn_chars(),
            max_pinned_chars: 0,
        }
    }
}

impl ContextConfig {
    pub fn effective_max_pinned_chars(&self) -> usize {
        if self.max_pinned_chars == 0 {
            self.budget_chars / 4
        } else {
            self.max_pinned_chars
        }
    }
}

fn default_budget_chars() -> usize {
    48_000
}

fn default_keep_recent_turns() -> usize {
    8
}

fn default_max_turn_chars() -> usize {
    12_000
}

/// Tool execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: default_call_timeout(),
            turn_timeout_secs: default_turn_timeout(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_call_timeout() -> u64 {
    60
}

fn default_turn_timeout() -> u64 {
    300
}

/// How a `RequireConfirmation` verdict is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmMode {
    #[default]
    Ask,
    Approve,
    Deny,
}

impl std::str::FromStr for ConfirmMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(ConfirmMode::Ask),
            "approve" | "yes" => Ok(ConfirmMode::Approve),
            "deny" | "no" => Ok(ConfirmMode::Deny),
            other => Err(ConfigError::Invalid {
                field: "safety.confirm".to_string(),
                reason: format!("unknown mode '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SafetyConfig {
    #[serde(default)]
    pub confirm: ConfirmMode,
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl Config {
    /// Load from `~/.warden/config.json`
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from a specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to a specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.agent.max_iterations == 0 {
            return Err(invalid("agent.max_iterations", "must be at least 1"));
        }
        if self.dispatch.max_concurrency == 0 {
            return Err(invalid("dispatch.max_concurrency", "must be at least 1"));
        }
        if self.context.budget_chars == 0 {
            return Err(invalid("context.budget_chars", "must be positive"));
        }
        // three pin kinds must still leave room for turns
        if self.context.effective_max_pinned_chars() * 3 >= self.context.budget_chars {
            return Err(invalid(
                "context.max_pinned_chars",
                "three pinned entries must leave room for turns inside the budget",
            ));
        }
        Ok(())
    }

    /// API key from the file, falling back to the environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(|name| std::env::var(name).ok())
    }

    pub fn api_key_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(Some(self.provider.api_key.clone()))
            .or_else(|| non_empty(env(ENV_API_KEY)))
            .or_else(|| non_empty(env(ENV_OPENAI_API_KEY)))
    }

    pub fn api_base(&self) -> Option<String> {
        self.api_base_with(|name| std::env::var(name).ok())
    }

    pub fn api_base_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(self.provider.api_base.clone()).or_else(|| non_empty(env(ENV_API_BASE)))
    }

    /// Model name; `WARDEN_MODEL` overrides only the built-in default
    pub fn model(&self) -> String {
        self.model_with(|name| std::env::var(name).ok())
    }

    pub fn model_with(&self, env: impl Fn(&str) -> Option<String>) -> String {
        if self.provider.model != default_model() && !self.provider.model.is_empty() {
            return self.provider.model.clone();
        }
        non_empty(env(ENV_MODEL)).unwrap_or_else(|| self.provider.model.clone())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Create the config file and data directory if missing
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("Config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("Created config at {:?}", config_path);
    }

    Config::load().await
}
