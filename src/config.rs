//! Agent configuration loading.
//!
//! Reads `assistant.yaml` and resolves environment variables. Every field has
//! a default, so a missing file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "assistant.yaml";

/// Environment variable pointing directly at a config file.
pub const CONFIG_ENV_VAR: &str = "ASSISTANT_CORE_CONFIG";

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Types ──────────────────────────────────────────────────────────────────

/// Runtime configuration for the tool loop and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum generation steps per turn before the loop stops with a warning.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Tool output longer than this is truncated before it reaches the model.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    /// Expire unanswered permission requests. Absent means wait indefinitely.
    #[serde(default)]
    pub permission_timeout_secs: Option<u64>,
    /// Default timeout for the `bash` tool.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Sandbox boundary for sessions that do not set their own.
    #[serde(default)]
    pub default_working_directory: Option<String>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Rotated `agent.log.N` files kept next to the live log.
    #[serde(default = "default_log_files_kept")]
    pub log_files_kept: u32,
    /// SQLite database path; defaults to `agent.db` in the app data directory.
    #[serde(default)]
    pub database_path: Option<String>,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_tool_result_chars() -> usize {
    30_000
}
fn default_command_timeout_secs() -> u64 {
    120
}
fn default_log_files_kept() -> u32 {
    3
}
fn default_log_filter() -> String {
    "assistant_core=info,warn".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_result_chars: default_max_tool_result_chars(),
            permission_timeout_secs: None,
            command_timeout_secs: default_command_timeout_secs(),
            default_working_directory: None,
            log_filter: default_log_filter(),
            log_files_kept: default_log_files_kept(),
            database_path: None,
        }
    }
}

impl AgentConfig {
    /// Find and load the config, falling back to defaults when none exists
    /// or it fails to load.
    pub fn load_or_default(start: &Path) -> Self {
        let Some(path) = find_config_path(start) else {
            return Self::default();
        };
        match load_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded agent config");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "failed to load agent config, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn permission_timeout(&self) -> Option<Duration> {
        self.permission_timeout_secs.map(Duration::from_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// The configured default working directory, with `~` expanded.
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.default_working_directory
            .as_deref()
            .map(|dir| PathBuf::from(expand_tilde(dir)))
    }

    /// The SQLite path, defaulting into the app data directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(expand_tilde(path)),
            None => crate::data_dir().join("agent.db"),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_iterations must be at least 1".into(),
            });
        }
        if self.max_tool_result_chars == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_tool_result_chars must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate `assistant.yaml`.
///
/// Checks `ASSISTANT_CORE_CONFIG` first, then walks upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(
            path = %candidate.display(),
            env = CONFIG_ENV_VAR,
            "config override points to a missing file"
        );
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and validate a config file.
///
/// String values may reference `${VAR}` or `${VAR:-default}`.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

fn parse_config(raw: &str) -> Result<AgentConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AgentConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                expr.push(c);
            }
            result.push_str(&resolve_var_expr(&expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
