//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::monitor::MonitorSettings;
use crate::transport::TransportKind;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Checkpoint session configuration
    pub session: SessionConfig,
    /// Connection monitor configuration
    pub monitor: MonitorConfig,
    /// Tool registry configuration
    pub tools: ToolsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Loopback address to bind to
    pub host: String,
    /// Port number for the HTTP transport
    pub port: u16,
    /// Transport to start with: "stdio", "http", or "auto"
    pub transport: TransportKind,
    /// Pause between stop and start during a restart, in milliseconds
    pub settle_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7850,
            transport: TransportKind::Stdio,
            settle_delay_ms: 200,
        }
    }
}

impl ServerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Base URL monitors and local clients should probe.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Checkpoint session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds a session waits for a human answer before resolving to
    /// "don't continue"
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 24 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Connection monitor configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between liveness probes
    pub ping_interval_secs: u64,
    /// Per-probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Base reconnect delay in milliseconds (doubles per attempt)
    pub reconnect_base_ms: u64,
    /// Attempts before the monitor parks in the error state
    pub max_reconnect_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            probe_timeout_secs: 5,
            reconnect_base_ms: 1000,
            max_reconnect_attempts: 5,
        }
    }
}

impl MonitorConfig {
    /// Runtime settings for a monitor probing `base_url`.
    pub fn settings(&self, base_url: impl Into<String>) -> MonitorSettings {
        MonitorSettings {
            base_url: base_url.into(),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

/// Tool registry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Publish pseudo-random tool names per process start. Legacy aliases
    /// resolve either way.
    pub rotate_names: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { rotate_names: true }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Verbose diagnostics toggle; forces the level to "debug"
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl LoggingConfig {
    /// The effective filter directive for `tracing-subscriber`.
    pub fn directive(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.level
        }
    }
}
