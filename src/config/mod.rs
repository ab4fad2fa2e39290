//! # Bus Configuration
//!
//! Validated options for the durable bus: where the log lives, how its tables
//! are named, and how handlers and interceptors are instantiated.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use durabus::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then `durabus.toml` (if present), then DURABUS__* variables
//! let manager = ConfigManager::load_from_file("durabus.toml")?;
//! let schema = &manager.config().schema;
//! println!("envelopes live in {}", schema.qualified(&schema.handler_message_table));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{details, tables};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Schema and table names of the durable log
    pub schema: SchemaConfig,

    /// Dispatcher behavior
    pub dispatch: DispatchConfig,

    /// Host registration settings
    pub host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Explicit connection string, falling back to `DATABASE_URL`.
    pub fn connection_url(&self) -> Option<String> {
        self.connection_string
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Per-table schema/name overrides for the durable log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub schema_name: String,
    pub host_table: String,
    pub host_type_table: String,
    pub message_type_table: String,
    pub handler_message_table: String,
    pub message_body_table: String,
    pub handler_message_log_table: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            schema_name: tables::SCHEMA.to_string(),
            host_table: tables::HOST.to_string(),
            host_type_table: tables::HOST_TYPE.to_string(),
            message_type_table: tables::MESSAGE_TYPE.to_string(),
            handler_message_table: tables::HANDLER_MESSAGE.to_string(),
            message_body_table: tables::MESSAGE_BODY.to_string(),
            handler_message_log_table: tables::HANDLER_MESSAGE_LOG.to_string(),
        }
    }
}

impl SchemaConfig {
    /// Quoted `"schema"."table"` identifier.
    pub fn qualified(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", self.schema_name, table)
    }

    fn identifiers(&self) -> [(&'static str, &str); 7] {
        [
            ("schema.schema_name", &self.schema_name),
            ("schema.host_table", &self.host_table),
            ("schema.host_type_table", &self.host_type_table),
            ("schema.message_type_table", &self.message_type_table),
            ("schema.handler_message_table", &self.handler_message_table),
            ("schema.message_body_table", &self.message_body_table),
            (
                "schema.handler_message_log_table",
                &self.handler_message_log_table,
            ),
        ]
    }

    /// Names are interpolated into SQL, so only plain identifiers are allowed.
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in self.identifiers() {
            if value.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "schema configuration",
                ));
            }
            let valid = value
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && value.len() <= 63;
            if !valid {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be a plain SQL identifier (letters, digits, underscore; max 63 chars)",
                ));
            }
        }
        Ok(())
    }
}

/// How a registered handler or interceptor factory is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLifetime {
    /// Factory invoked once, instance shared by every dispatch
    #[default]
    Singleton,
    /// Factory invoked for every dispatch
    Transient,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub handler_lifetime: ServiceLifetime,
    pub interceptor_lifetime: ServiceLifetime,
    /// Re-materialize every message from its persisted payload before handling
    pub roundtrip_payloads: bool,
    /// Client-facing message used when a handler fails without setting one
    pub default_client_message: String,
    /// Carried into the handler context; enforcement is up to the handler
    pub default_timeout_seconds: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_lifetime: ServiceLifetime::Singleton,
            interceptor_lifetime: ServiceLifetime::Singleton,
            roundtrip_payloads: false,
            default_client_message: details::DEFAULT_CLIENT_MESSAGE.to_string(),
            default_timeout_seconds: None,
        }
    }
}

impl DispatchConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    pub application_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            application_name: "durabus".to_string(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.schema.validate()?;

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool must allow at least one connection",
            ));
        }
        if self.dispatch.default_client_message.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "dispatch.default_client_message",
                "dispatch configuration",
            ));
        }
        if self.dispatch.default_timeout_seconds == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "dispatch.default_timeout_seconds",
                "0",
                "timeout must be positive when set",
            ));
        }
        if self.host.application_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "host.application_name",
                "host configuration",
            ));
        }
        Ok(())
    }
}
