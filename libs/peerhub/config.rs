use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Hub server configuration
///
/// Every field has a default, so a config file only needs the values it
/// wants to override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,

    /// Liveness ping cycle in milliseconds, 0 disables
    pub ping_interval_ms: u64,

    /// Nudge broadcast cycle in milliseconds, 0 disables
    pub nudge_interval_ms: u64,

    /// Mirror hub and message lifecycle events to debout subscribers
    pub debout_enabled: bool,

    /// Passphrase for userId encryption; absent or empty means userIds pass
    /// through unencrypted (a one-time warning is emitted)
    pub encryption_key: Option<String>,

    /// Bound of each session's outbound queue; a slow socket drops frames
    /// instead of stalling the hub
    pub send_queue_size: usize,

    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9190".to_string(),
            ping_interval_ms: 10_000,
            nudge_interval_ms: 10_000,
            debout_enabled: false,
            encryption_key: None,
            send_queue_size: 64,
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: HubConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::ValidationError(
                "listen_addr must not be empty".to_string(),
            ));
        }
        if self.send_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "send_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Dump the effective configuration to the log
    pub fn log(&self) {
        info!("Hub configuration:");
        info!("  listen_addr: {}", self.listen_addr);
        info!("  ping_interval_ms: {}", self.ping_interval_ms);
        info!("  nudge_interval_ms: {}", self.nudge_interval_ms);
        info!("  debout_enabled: {}", self.debout_enabled);
        info!(
            "  encryption: {}",
            if self.encryption_key.as_deref().unwrap_or("").is_empty() {
                "disabled"
            } else {
                "enabled"
            }
        );
        info!("  send_queue_size: {}", self.send_queue_size);
    }
}
