//! Configuration stored in `widgetgen.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "widgetgen.toml";

/// Pipeline configuration (TOML).
///
/// Every field has a default so a partial or missing file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenConfig {
    /// Model passed to the agent when the caller does not pick one.
    pub model: String,

    /// Log prompt previews, raw agent events and full validation reports.
    pub debug: bool,

    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command prefix for the agent CLI (e.g. `["cursor-agent"]`).
    pub command: Vec<String>,

    /// Environment variable holding the agent credential.
    pub api_key_env: String,

    /// Hard wall-clock cap for one agent process.
    pub timeout_secs: u64,

    /// Pass `--force` so the agent never stops to ask for confirmation.
    pub force: bool,

    /// Keep at most this many bytes of agent stderr.
    pub stderr_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["cursor-agent".to_string()],
            api_key_env: "CURSOR_API_KEY".to_string(),
            timeout_secs: 5 * 60,
            force: true,
            stderr_limit_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first one, per phase.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// JSON dataset used by the internal-database source.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/internal-database.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ip_window_secs: u64,
    pub ip_max_requests: u32,
    pub session_window_secs: u64,
    pub session_max_requests: u32,
    pub widget_min_interval_secs: u64,
    pub widget_max_refreshes: u32,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_window_secs: 60 * 60,
            ip_max_requests: 100,
            session_window_secs: 24 * 60 * 60,
            session_max_requests: 20,
            widget_min_interval_secs: 5,
            widget_max_refreshes: 50,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            model: "composer-1".to_string(),
            debug: false,
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            database: DatabaseConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl GenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.api_key_env.trim().is_empty() {
            return Err(anyhow!("agent.api_key_env must be non-empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.stderr_limit_bytes == 0 {
            return Err(anyhow!("agent.stderr_limit_bytes must be > 0"));
        }
        let limits = &self.rate_limit;
        if limits.ip_window_secs == 0 || limits.session_window_secs == 0 {
            return Err(anyhow!("rate_limit windows must be > 0"));
        }
        if limits.ip_max_requests == 0
            || limits.session_max_requests == 0
            || limits.widget_max_refreshes == 0
        {
            return Err(anyhow!("rate_limit caps must be > 0"));
        }
        if limits.sweep_interval_secs == 0 {
            return Err(anyhow!("rate_limit.sweep_interval_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply `WIDGETGEN_MODEL` (or `CURSOR_MODEL`) and `AGENT_DEBUG`.
    ///
    /// Takes a lookup function so tests do not touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup("WIDGETGEN_MODEL")
            .or_else(|| lookup("CURSOR_MODEL"))
            .filter(|m| !m.trim().is_empty());
        if let Some(model) = model {
            self.model = model.trim().to_string();
        }
        if let Some(flag) = lookup("AGENT_DEBUG") {
            self.debug = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }
    }
}

/// Load config from a TOML file, then apply environment overrides.
///
/// If the file is missing, starts from `GenConfig::default()`.
pub fn load_config(path: &Path) -> Result<GenConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        GenConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
