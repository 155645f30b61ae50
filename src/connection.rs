//! Validated broker connection details

use crate::adapter::Adapter;
use crate::config::{ClientOptions, ConnectionOptions, QueueConfig, QueueOptions};
use crate::error::{QueueError, QueueResult};
use std::path::Path;

/// Queue name that resolves to the configured `default_queue`
pub const DEFAULT_QUEUE: &str = "default";

/// Connection options accepted by an adapter.
///
/// A `Connection` can only be built through [`Connection::new`], so holding
/// one means the adapter's required fields were present at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    options: ConnectionOptions,
}

impl Connection {
    /// Validate `options` against `adapter` and wrap them
    pub fn new(options: ConnectionOptions, adapter: &dyn Adapter) -> QueueResult<Self> {
        Self::validate(&options, adapter)?;
        Ok(Self { options })
    }

    /// Check `options` with the adapter's own required-field rules
    pub fn validate(options: &ConnectionOptions, adapter: &dyn Adapter) -> QueueResult<()> {
        adapter.check_connection_details(options)
    }

    /// Load the options for `environment` from a TOML config file
    pub fn from_config_file(
        path: &Path,
        environment: &str,
        adapter: &dyn Adapter,
    ) -> QueueResult<Self> {
        let config = QueueConfig::load_from_file(path)?;
        let options = config.environment(environment)?.clone();
        Self::new(options, adapter)
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The configured default queue name
    pub fn queue_name(&self) -> QueueResult<&str> {
        self.options
            .default_queue
            .as_deref()
            .ok_or_else(|| QueueError::invalid_connection_details("Missing a default queue name."))
    }

    /// Map `"default"` to [`Connection::queue_name`], leave other names alone
    pub fn resolve_queue_name<'a>(&'a self, queue_name: &'a str) -> QueueResult<&'a str> {
        if queue_name == DEFAULT_QUEUE {
            self.queue_name()
        } else {
            Ok(queue_name)
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        self.options.client_options()
    }

    pub fn queue_options(&self) -> QueueOptions {
        self.options.queue_options()
    }

    /// Whether messages should be published persistent
    pub fn durable(&self) -> bool {
        self.options.durable.unwrap_or(false)
    }
}
