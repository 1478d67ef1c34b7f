use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_CHANNEL: &str = "/event/Chat_Message__e";
pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";

/// Environment variable that overrides `send_endpoint`.
pub const SEND_ENDPOINT_ENV: &str = "CHAT_SEND_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_channel")]
    pub channel_name: String,
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// HTTP endpoint for outbound sends. Without it messages are broadcast
    /// on the gossip channel directly.
    #[serde(default)]
    pub send_endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub sanitize_inbound: bool,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel_name: default_channel(),
            bootstrap_nodes: Vec::new(),
            listen_addr: default_listen_addr(),
            send_endpoint: None,
            sanitize_inbound: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Applies environment overrides on top of the file values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(SEND_ENDPOINT_ENV) {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                self.send_endpoint = Some(endpoint.to_string());
            }
        }
        self
    }
}

/// Resubscription behaviour after a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Errors leave the subscription as is and nothing is retried.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether an error should lead to a resubscribe at all.
    pub fn retries(&self) -> bool {
        self.enabled && self.max_attempts > 0
    }

    /// Delay before the given (zero-based) resubscribe attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Reads and parses the config file without any fallback.
pub fn read_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Like [`read_config`], but a missing or broken file yields the defaults.
pub fn load_config(path: &str) -> AppConfig {
    read_config(path).unwrap_or_else(|err| {
        match &err {
            ConfigError::Io(_) => log::info!("No usable config at {path} ({err}); using defaults"),
            ConfigError::Parse(_) => log::warn!("Ignoring config at {path}: {err}"),
        }
        AppConfig::default()
    })
}

pub fn save_config(path: &str, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
