//! Layered configuration loading for the switchboard MCP server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use switchconf::SwitchConfig;
//!
//! let config = SwitchConfig::load().expect("Failed to load config");
//! println!("Listening on {}", config.bind.addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/switchboard/config.toml` (system)
//! 2. `~/.config/switchboard/config.toml` (user)
//! 3. `./switchboard.toml` (local override), or the `--config` path instead
//! 4. Environment variables (`HOST`, `PORT`, `SWITCHBOARD_*`, `RUST_LOG`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! Files are deep-merged: a later file only needs the keys it changes.
//! The merged result is validated last; `keep_alive_secs` must be non-zero.
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [telemetry]
//! otlp_endpoint = "http://127.0.0.1:4317"
//! log_level = "info,switchboard=debug"
//!
//! [sessions]
//! resumable = true
//! event_store_capacity = 1024
//! close_timeout_ms = 5000
//! keep_alive_secs = 30
//! ```

pub mod infra;
pub mod loader;

pub use infra::{BindConfig, SessionsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid merged configuration: {0}")]
    Merged(String),

    #[error("Invalid value {value:?} for {var}: {message}")]
    Env {
        var: String,
        value: String,
        message: String,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SwitchConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl SwitchConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` in place of `./switchboard.toml`.
    /// System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        Self::load_layered(&files, |name| std::env::var(name).ok())
    }

    /// Merge `files` in order over the compiled defaults, then apply
    /// environment overrides read through `env`.
    pub fn load_layered<F>(files: &[PathBuf], env: F) -> Result<(Self, ConfigSources), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::read_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let mut config: SwitchConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Merged(e.to_string()))?;

        loader::apply_env_overrides_with(&mut config, &mut sources, env)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values that parse but cannot be served with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sessions.keep_alive_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!("# switchboard configuration\n\n{}", body))
    }
}
