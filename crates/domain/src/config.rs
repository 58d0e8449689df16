use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where durable gateway state lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding `sessions.json` (the persisted session snapshot).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,

    /// Directory holding per-session auth artifacts
    /// (`<auth_path>/session-<id>/`).
    #[serde(default = "d_auth_path")]
    pub auth_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            auth_path: d_auth_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Autosave
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Periodic persistence of the in-memory session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,

    /// Minutes between autosave ticks.
    #[serde(default = "d_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: d_interval_minutes(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connected-session notification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Webhook fired when a session reaches the `connected` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Target URL. `None` disables connected notifications.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries on 5xx responses.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: d_timeout_ms(),
            max_retries: d_max_retries(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.state.state_path.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "state.state_path".into(),
                message: "state_path must not be empty".into(),
            });
        }

        if self.state.auth_path.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "state.auth_path".into(),
                message: "auth_path must not be empty".into(),
            });
        }

        if self.autosave.enabled && self.autosave.interval_minutes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "autosave.interval_minutes".into(),
                message: "interval must be greater than 0 when autosave is enabled".into(),
            });
        }

        if self.notify.timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "notify.timeout_ms".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        // Warn when connected notifications are disabled.
        if self.notify.webhook_url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "notify.webhook_url".into(),
                message: "no webhook URL configured — connected notifications disabled".into(),
            });
        }

        errors
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./state")
}
fn d_auth_path() -> PathBuf {
    PathBuf::from("./state/auth")
}
fn d_interval_minutes() -> u64 {
    5
}
fn d_timeout_ms() -> u64 {
    10_000
}
fn d_max_retries() -> u32 {
    3
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        let issues = config.validate();
        assert!(
            issues
                .iter()
                .all(|i| i.severity == ConfigSeverity::Warning),
            "default config must not produce errors: {issues:?}"
        );
    }

    #[test]
    fn zero_autosave_interval_rejected() {
        let mut config = Config::default();
        config.autosave.interval_minutes = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.field == "autosave.interval_minutes"));
    }

    #[test]
    fn disabled_autosave_ignores_interval() {
        let mut config = Config::default();
        config.autosave.enabled = false;
        config.autosave.interval_minutes = 0;
        let issues = config.validate();
        assert!(!issues
            .iter()
            .any(|i| i.field == "autosave.interval_minutes"));
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [autosave]
            interval_minutes = 10

            [notify]
            webhook_url = "https://backend.example/hooks/session"
            "#,
        )
        .unwrap();
        assert_eq!(config.autosave.interval_minutes, 10);
        assert!(config.notify.webhook_url.is_some());
        assert_eq!(config.notify.max_retries, 3);
    }
}
