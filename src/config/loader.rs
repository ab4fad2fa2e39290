//! Configuration Loader
//!
//! Layered loading through the `config` crate: compiled defaults, then an
//! optional file (format chosen by extension), then `DURABUS__*` environment
//! variables. The merged result is validated before it is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::BusConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Prefix for environment overrides, e.g. `DURABUS__SCHEMA__SCHEMA_NAME=audit`.
pub const ENV_PREFIX: &str = "DURABUS";

/// Loaded, validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: BusConfig,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults overlaid with environment variables
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_sources(None, Self::environment())
    }

    /// Defaults, then the given file (which must exist), then environment variables
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound(path.to_path_buf()));
        }
        Self::load_from_sources(Some(path), Self::environment())
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: BusConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            source_file: None,
        }))
    }

    pub(crate) fn load_from_sources(
        file: Option<&Path>,
        environment: Environment,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = Config::try_from(&BusConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            debug!(file = %path.display(), "Loading bus configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(environment);

        let merged = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(Self::source_name(file), e))?;
        let config: BusConfig = merged
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(Self::source_name(file), e))?;

        config.validate()?;

        crate::logging::log_registry_operation(
            "config_loaded",
            Some(&config.schema.schema_name),
            "ok",
            file.map(|p| p.display().to_string()).as_deref(),
        );

        Ok(Arc::new(ConfigManager {
            config,
            source_file: file.map(Path::to_path_buf),
        }))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn source_name(file: Option<&Path>) -> String {
        file.map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }
}
