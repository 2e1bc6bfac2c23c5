//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the HTTP listener binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Interface to bind.
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// TCP port.
    /// Default: 3000
    #[serde(default = "BindConfig::default_port")]
    pub port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        3000
    }

    /// `host:port` for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// Logging and trace export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Export is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Filter directive (trace, debug, info, warn, error, or an `EnvFilter` string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

/// Session handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Keep server-to-client messages so dropped SSE streams can resume.
    /// Default: true
    #[serde(default = "SessionsConfig::default_resumable")]
    pub resumable: bool,

    /// Events kept by the in-memory event store, across all sessions.
    /// Default: 1024
    #[serde(default = "SessionsConfig::default_event_store_capacity")]
    pub event_store_capacity: usize,

    /// Bound on closing one session during shutdown.
    /// Default: 5000
    #[serde(default = "SessionsConfig::default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// SSE keep-alive interval.
    /// Default: 30
    #[serde(default = "SessionsConfig::default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl SessionsConfig {
    fn default_resumable() -> bool {
        true
    }

    fn default_event_store_capacity() -> usize {
        1024
    }

    fn default_close_timeout_ms() -> u64 {
        5000
    }

    fn default_keep_alive_secs() -> u64 {
        30
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            resumable: Self::default_resumable(),
            event_store_capacity: Self::default_event_store_capacity(),
            close_timeout_ms: Self::default_close_timeout_ms(),
            keep_alive_secs: Self::default_keep_alive_secs(),
        }
    }
}
