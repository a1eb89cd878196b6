//! Configuration loading
//!
//! Values come from `~/.convergio/config.toml` when present, then from
//! environment variables (which win), then defaults. Only the knobs the
//! core actually consumes are surfaced here.

use crate::error::{ConvergioError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable names
const ENV_BUDGET: &str = "CONVERGIO_BUDGET_LIMIT_USD";
const ENV_DB_PATH: &str = "CONVERGIO_PLAN_DB";
const ENV_NODE_TIMEOUT: &str = "CONVERGIO_NODE_TIMEOUT_SECS";
const ENV_RETRY_BASE: &str = "CONVERGIO_RETRY_BASE_DELAY_SECS";
const ENV_LOCAL_CONCURRENCY: &str = "CONVERGIO_LOCAL_CONCURRENCY";
const ENV_MAX_TOOL_ITERATIONS: &str = "CONVERGIO_MAX_TOOL_ITERATIONS";
const ENV_AGENTS_DIR: &str = "CONVERGIO_AGENTS_DIR";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Budget limit in USD; `None` means unlimited
    pub budget_limit_usd: Option<f64>,
    /// Plan database location
    pub plan_db_path: PathBuf,
    /// Default per-node timeout for the workflow engine
    pub node_timeout_secs: u64,
    /// Base delay for retry backoff
    pub retry_base_delay_secs: u64,
    /// In-flight call cap applied to local providers
    pub local_concurrency_cap: usize,
    /// Provider rounds allowed per orchestrator request
    pub max_tool_iterations: usize,
    /// Directory of agent persona files, if any
    pub agents_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget_limit_usd: None,
            plan_db_path: default_db_path(),
            node_timeout_secs: 300,
            retry_base_delay_secs: 1,
            local_concurrency_cap: 2,
            max_tool_iterations: 10,
            agents_dir: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".convergio")
        .join("plans.db")
}

/// On-disk shape of `config.toml`; every field optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    budget_limit_usd: Option<f64>,
    plan_db_path: Option<PathBuf>,
    node_timeout_secs: Option<u64>,
    retry_base_delay_secs: Option<u64>,
    local_concurrency_cap: Option<usize>,
    max_tool_iterations: Option<usize>,
    agents_dir: Option<PathBuf>,
}

impl Config {
    /// Load the default file location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let file = dirs::home_dir()
            .map(|h| h.join(".convergio").join("config.toml"))
            .filter(|p| p.exists());
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load a specific config file (environment still wins)
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(category = "system", path = %path.display(), "loading config file");
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| ConvergioError::Config(format!("{}: {e}", path.display())))?;

        let defaults = Self::default();
        Ok(Self {
            budget_limit_usd: file.budget_limit_usd,
            plan_db_path: file.plan_db_path.unwrap_or(defaults.plan_db_path),
            node_timeout_secs: file.node_timeout_secs.unwrap_or(defaults.node_timeout_secs),
            retry_base_delay_secs: file
                .retry_base_delay_secs
                .unwrap_or(defaults.retry_base_delay_secs),
            local_concurrency_cap: file
                .local_concurrency_cap
                .unwrap_or(defaults.local_concurrency_cap),
            max_tool_iterations: file
                .max_tool_iterations
                .unwrap_or(defaults.max_tool_iterations),
            agents_dir: file.agents_dir,
        })
    }

    fn apply_env(&mut self) {
        if let Some(value) = env_parse::<f64>(ENV_BUDGET) {
            self.budget_limit_usd = Some(value);
        }
        if let Ok(value) = std::env::var(ENV_DB_PATH) {
            self.plan_db_path = PathBuf::from(value);
        }
        if let Some(value) = env_parse(ENV_NODE_TIMEOUT) {
            self.node_timeout_secs = value;
        }
        if let Some(value) = env_parse(ENV_RETRY_BASE) {
            self.retry_base_delay_secs = value;
        }
        if let Some(value) = env_parse(ENV_LOCAL_CONCURRENCY) {
            self.local_concurrency_cap = value;
        }
        if let Some(value) = env_parse(ENV_MAX_TOOL_ITERATIONS) {
            self.max_tool_iterations = value;
        }
        if let Ok(value) = std::env::var(ENV_AGENTS_DIR) {
            self.agents_dir = Some(PathBuf::from(value));
        }
    }
}

impl Config {
    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> convergio_engine::EngineConfig {
        convergio_engine::EngineConfig {
            default_node_timeout_secs: self.node_timeout_secs,
            retry: convergio_engine::RetryPolicy {
                base_delay_secs: self.retry_base_delay_secs,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Orchestrator settings derived from this configuration
    pub fn orchestrator_config(&self, workspace: String) -> crate::OrchestratorConfig {
        crate::OrchestratorConfig {
            max_tool_iterations: self.max_tool_iterations,
            local_concurrency_cap: self.local_concurrency_cap,
            workspace,
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
