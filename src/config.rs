//! # Monitor Configuration
//!
//! Loads the TOML configuration file that describes which broker to watch, which
//! topics to subscribe to, how many messages to keep and which filter to start with.
//!
//! The default location is `<config dir>/mqttmonitor/config.toml` (see [`dirs`]). A
//! missing default file is written out with default values on first start so users have
//! something to edit. Every section is optional; missing keys fall back to defaults.
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! port = 1883
//!
//! [[subscriptions]]
//! topic = "sensors/#"
//! qos = 1
//!
//! [store]
//! capacity = 2000
//!
//! [filter]
//! text = ""
//! publisher = ""
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::mqtt::config::{BrokerSettings, Subscription};
use crate::store::DEFAULT_CAPACITY;

const CONFIG_DIR: &str = "mqttmonitor";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub broker: BrokerSettings,
    pub subscriptions: Vec<Subscription>,
    pub store: StoreConfig,
    pub filter: FilterConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Filter applied when the monitor starts
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub text: String,
    /// Empty selects every publisher
    pub publisher: String,
}

impl FilterConfig {
    pub fn selected_publisher(&self) -> Option<String> {
        let publisher = self.publisher.trim();
        (!publisher.is_empty()).then(|| publisher.to_string())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" | "warning" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

impl MonitorConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(path, self.to_toml()?)
            .await
            .map_err(io_err)?;
        info!("Config written to {}", path.display());
        Ok(())
    }

    /// Writes a default config to `path` unless a file already exists there.
    /// Returns true when a file was written.
    pub async fn ensure_default_config(path: &Path) -> Result<bool, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config at {}, writing defaults", path.display());
            MonitorConfig::default().save(path).await?;
        }
        Ok(!exists)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.capacity == 0 {
            return Err(ConfigError::Invalid(
                "store.capacity must be greater than zero".into(),
            ));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host must not be empty".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must not be zero".into()));
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "broker.keep_alive_secs must be at least 5".into(),
            ));
        }
        if self.broker.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.request_capacity must be greater than zero".into(),
            ));
        }
        for sub in &self.subscriptions {
            if sub.topic.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "subscription topic must not be empty".into(),
                ));
            }
            if sub.qos > 2 {
                return Err(ConfigError::Invalid(format!(
                    "subscription '{}' has invalid qos {}",
                    sub.topic, sub.qos
                )));
            }
        }
        Ok(())
    }
}
