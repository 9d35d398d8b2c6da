//! Configuration for the cappuccino agent
//!
//! A single JSON document (`~/.cappuccino/config.json`); every field has a
//! default so partial files are fine. A few environment variables override
//! the provider section.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, state_dir, workspace_path};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Language-model service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
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
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    500
}

/// Planner / executor / analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the plan and result queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Size of the pool running blocking tools
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// 1 executes tasks strictly one at a time
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_threads: default_worker_threads(),
            max_parallel_tasks: default_max_parallel_tasks(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_queue_capacity() -> usize {
    32
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_parallel_tasks() -> usize {
    1
}

fn default_task_timeout() -> u64 {
    120
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Directory for state documents; unset means `~/.cappuccino/state`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
    /// Cache entries older than this are ignored; unset keeps them forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    /// Answer repeated queries from the cache
    #[serde(default)]
    pub reuse_cached_answers: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            state_dir: None,
            max_history_messages: default_max_history(),
            cache_ttl_secs: None,
            reuse_cached_answers: false,
        }
    }
}

fn default_agent_id() -> String {
    "default".to_string()
}

fn default_max_history() -> usize {
    200
}

/// Built-in tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root for file, shell and image tools; unset means `~/.cappuccino/workspace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default)]
    pub search_api_key: String,
    #[serde(default = "default_max_results")]
    pub search_max_results: u32,
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            search_api_key: String::new(),
            search_max_results: default_max_results(),
            shell_timeout_secs: default_shell_timeout(),
        }
    }
}

fn default_max_results() -> u32 {
    5
}

fn default_shell_timeout() -> u64 {
    60
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()).await?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific file; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        self.save_to(&config_path()).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Override provider settings from the environment.
    ///
    /// `OPENAI_API_KEY`, `OPENAI_API_BASE` and `CAPPUCCINO_MODEL` win over
    /// the file when set and non-empty.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(base) = get("OPENAI_API_BASE") {
            self.provider.api_base = Some(base);
        }
        if let Some(model) = get("CAPPUCCINO_MODEL") {
            self.provider.model = model;
        }
    }

    /// Whether a language model can be reached
    pub fn has_api_key(&self) -> bool {
        !self.provider.api_key.is_empty()
    }

    /// Resolved tool workspace
    pub fn workspace_path(&self) -> PathBuf {
        match &self.tools.workspace {
            Some(path) if !path.is_empty() => paths::expand_tilde(path),
            _ => workspace_path(),
        }
    }

    /// Resolved state directory
    pub fn state_path(&self) -> PathBuf {
        match &self.state.state_dir {
            Some(path) if !path.is_empty() => paths::expand_tilde(path),
            _ => state_dir(),
        }
    }

    /// Search API key, if configured
    pub fn search_api_key(&self) -> Option<String> {
        let key = &self.tools.search_api_key;
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }
}

/// Create the default config file and workspace if missing
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("Config already exists at {:?}", config_path);
    } else {
        Config::default().save().await?;
        info!("Created config at {:?}", config_path);
    }

    let config = Config::load().await?;
    tokio::fs::create_dir_all(config.workspace_path()).await?;
    tokio::fs::create_dir_all(config.state_path()).await?;
    info!("Workspace ready at {:?}", config.workspace_path());

    Ok(config)
}
