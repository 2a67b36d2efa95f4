//! Configuration for the chat streaming client.
//!
//! Values come from code defaults, a TOML file, or `STOCKCHAT_*` environment
//! variables. Durations use humantime notation (`"2s"`, `"150ms"`).

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Top-level configuration for one chat streaming client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamConfig {
    /// Base URL of the chat API, without a trailing slash (e.g. "https://app.example.com/api").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request, if any.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Where the login redirect points when the backend answers 401.
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// Fixed delay between polls when no immediate re-poll is requested.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound for a single HTTP request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Terminal-status responses with no events tolerated before giving up.
    #[serde(default = "default_max_empty_terminal_polls")]
    pub max_empty_terminal_polls: u32,
    /// Pause after disconnecting a live loop before submitting a new message.
    #[serde(default = "default_resubmit_grace", with = "humantime_serde")]
    pub resubmit_grace: Duration,
    /// Automatic resubmission when the backend reports it is busy.
    #[serde(default)]
    pub busy_retry: BusyRetryConfig,
}

/// Backoff policy for resubmitting after `ServerBusy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyRetryConfig {
    /// Total submission attempts, including the first.
    #[serde(default = "default_busy_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_busy_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_busy_multiplier")]
    pub multiplier: u32,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_login_url() -> String {
    "/login".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(2000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_empty_terminal_polls() -> u32 {
    3
}

fn default_resubmit_grace() -> Duration {
    Duration::from_millis(100)
}

fn default_busy_attempts() -> u32 {
    3
}

fn default_busy_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_busy_multiplier() -> u32 {
    2
}

impl Default for BusyRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_busy_attempts(),
            initial_backoff: default_busy_initial_backoff(),
            multiplier: default_busy_multiplier(),
        }
    }
}

impl BusyRetryConfig {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from zero.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            login_url: default_login_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            max_empty_terminal_polls: default_max_empty_terminal_polls(),
            resubmit_grace: default_resubmit_grace(),
            busy_retry: BusyRetryConfig::default(),
        }
    }
}

impl ChatStreamConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Build from defaults overridden by `STOCKCHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `STOCKCHAT_*` environment variables, then validate.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("STOCKCHAT_API_URL") {
            self.base_url = url;
        }
        if let Ok(token) = env::var("STOCKCHAT_API_TOKEN") {
            if !token.is_empty() {
                self.auth_token = Some(token);
            }
        }
        if let Ok(url) = env::var("STOCKCHAT_LOGIN_URL") {
            self.login_url = url;
        }
        if let Some(ms) = env_millis("STOCKCHAT_POLL_INTERVAL_MS")? {
            self.poll_interval = ms;
        }
        if let Some(ms) = env_millis("STOCKCHAT_REQUEST_TIMEOUT_MS")? {
            self.request_timeout = ms;
        }
        if let Ok(raw) = env::var("STOCKCHAT_MAX_EMPTY_POLLS") {
            self.max_empty_terminal_polls =
                raw.parse().map_err(|e| ConfigError::InvalidValue {
                    key: "STOCKCHAT_MAX_EMPTY_POLLS".to_string(),
                    reason: format!("{}", e),
                })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(invalid("base_url", "must start with http:// or https://"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than zero"));
        }
        if self.max_empty_terminal_polls == 0 {
            return Err(invalid("max_empty_terminal_polls", "must be at least 1"));
        }
        if self.busy_retry.max_attempts == 0 {
            return Err(invalid("busy_retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Join `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
