//! Connection configuration
//!
//! Connection options are a small set of recognised keys plus an open map of
//! extra keys, so adapters can enforce their own required fields. A config
//! file is a TOML document with one table per environment:
//!
//! ```toml
//! [development]
//! host = "localhost"
//! user = "guest"
//! pass = "guest"
//! vhost = "/"
//! default_queue = "jobs"
//! durable = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Environment variable selecting the config table to load
pub const ENVIRONMENT_VAR: &str = "HUTCH_ENV";

/// Environment used when [`ENVIRONMENT_VAR`] is unset
pub const DEFAULT_ENVIRONMENT: &str = "development";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5672;
const DEFAULT_USER: &str = "guest";
const DEFAULT_PASS: &str = "guest";
const DEFAULT_VHOST: &str = "/";

/// Broker connection options as written in configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    /// Queue used when callers pass the name `"default"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_queue: Option<String>,
    /// Declare queues durable and publish persistent messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    /// Ask the broker client to log its operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
    /// Adapter-specific keys not known to this crate
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ConnectionOptions {
    /// Whether `key` is present, counting both recognised and extra keys
    pub fn contains_key(&self, key: &str) -> bool {
        match key {
            "host" => self.host.is_some(),
            "port" => self.port.is_some(),
            "user" => self.user.is_some(),
            "pass" => self.pass.is_some(),
            "vhost" => self.vhost.is_some(),
            "default_queue" => self.default_queue.is_some(),
            "durable" => self.durable.is_some(),
            "auto_delete" => self.auto_delete.is_some(),
            "logging" => self.logging.is_some(),
            other => self.extra.contains_key(other),
        }
    }

    /// Options used to construct a broker client.
    ///
    /// Queue declaration keys (`durable`, `auto_delete`) are excluded.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            user: self.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
            pass: self.pass.clone().unwrap_or_else(|| DEFAULT_PASS.to_string()),
            vhost: self.vhost.clone().unwrap_or_else(|| DEFAULT_VHOST.to_string()),
            logging: self.logging.unwrap_or(false),
            extra: self.extra.clone(),
        }
    }

    /// Options used when declaring queues
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            durable: self.durable.unwrap_or(false),
            auto_delete: self.auto_delete.unwrap_or(false),
        }
    }
}

/// Broker client construction options
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub vhost: String,
    pub logging: bool,
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Queue declaration options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No connection details for environment: {0}")]
    MissingEnvironment(String),
}

/// Connection options for every configured environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct QueueConfig {
    pub environments: BTreeMap<String, ConnectionOptions>,
}

impl QueueConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Connection options for one environment
    pub fn environment(&self, name: &str) -> Result<&ConnectionOptions, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::MissingEnvironment(name.to_string()))
    }
}

/// Environment name from [`ENVIRONMENT_VAR`], falling back to `development`
pub fn current_environment() -> String {
    std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
}
