//! relaybot-config: process configuration.
//!
//! Read once at startup from `~/.relaybot/config.json5` plus `.env` for
//! secrets, then passed as an immutable value to the scheduler and
//! executors. Nothing re-reads the environment during execution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Competition platform endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// API base URL.
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    /// Login username. Usually supplied via `PLATFORM_USERNAME`.
    #[serde(default)]
    pub username: String,
    /// Login password. Usually supplied via `PLATFORM_PASSWORD`.
    #[serde(default)]
    pub password: String,
    /// Webhook URL used when a task does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_webhook_url: Option<String>,
}

fn default_platform_url() -> String {
    "https://arena.example.com".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            username: String::new(),
            password: String::new(),
            default_webhook_url: None,
        }
    }
}

/// Telegram notification channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Usually supplied via `TELEGRAM_BOT_TOKEN`.
    #[serde(default)]
    pub bot_token: String,
}

/// Scheduler and monitoring timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task scans.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds between result polls while in cooldown.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Wall-clock cap on monitoring a single task, in seconds.
    #[serde(default = "default_max_monitoring_secs")]
    pub max_monitoring_secs: u64,
    /// Retry budget for transient agent failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cap on concurrently executing tasks.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Delivery retries for a terminal notification.
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_monitoring_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_notify_retries() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_monitoring_secs: default_max_monitoring_secs(),
            max_retries: default_max_retries(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            notify_retries: default_notify_retries(),
        }
    }
}

/// Top-level relaybot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayBotConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// IANA timezone label shown in user-facing timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Task database path; defaults to `<config dir>/tasks.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for RelayBotConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            telegram: TelegramConfig::default(),
            scheduler: SchedulerConfig::default(),
            timezone: default_timezone(),
            db_path: None,
        }
    }
}

impl RelayBotConfig {
    /// Resolve the task database path.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("tasks.db")),
        }
    }
}

/// Resolve the relaybot config directory (~/.relaybot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".relaybot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.relaybot/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
/// Secrets in the environment (after `.env`) override the file.
pub fn load_config() -> Result<RelayBotConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    let mut config = load_config_from(&path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load configuration from a specific path, falling back to defaults if
/// not found.
pub fn load_config_from(path: &Path) -> Result<RelayBotConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(RelayBotConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: RelayBotConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Secrets take precedence from the environment so they stay out of the
/// config file.
fn apply_env_overrides(config: &mut RelayBotConfig) {
    if let Ok(username) = std::env::var("PLATFORM_USERNAME") {
        config.platform.username = username;
    }
    if let Ok(password) = std::env::var("PLATFORM_PASSWORD") {
        config.platform.password = password;
    }
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = token;
    }
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &RelayBotConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayBotConfig::default();
        assert_eq!(config.scheduler.interval_secs, 30);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.scheduler.max_monitoring_secs, 600);
        assert_eq!(config.scheduler.max_retries, 2);
        assert_eq!(config.timezone, "UTC");
        assert!(config.platform.default_webhook_url.is_none());
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            platform: {
                base_url: "https://arena.example.org",
                default_webhook_url: "https://hooks.example.org/run",
            },
            scheduler: { interval_secs: 10, max_retries: 5 },
            timezone: "Asia/Kolkata",
        }"#;
        let config: RelayBotConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.platform.base_url, "https://arena.example.org");
        assert_eq!(
            config.platform.default_webhook_url.as_deref(),
            Some("https://hooks.example.org/run")
        );
        assert_eq!(config.scheduler.interval_secs, 10);
        assert_eq!(config.scheduler.max_retries, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.timezone, "Asia/Kolkata");
    }

    #[test]
    fn test_json5_parse_with_telegram() {
        let json5_str = r#"{
            telegram: { bot_token: "123:ABC" },
        }"#;
        let config: RelayBotConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.telegram.bot_token, "123:ABC");
    }

    #[test]
    fn test_db_path_override() {
        let mut config = RelayBotConfig::default();
        config.db_path = Some(PathBuf::from("/tmp/relaybot-test.db"));
        assert_eq!(
            config.db_path().unwrap(),
            PathBuf::from("/tmp/relaybot-test.db")
        );
    }
}
