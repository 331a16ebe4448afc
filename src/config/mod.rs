//! Configuration module for checkpoint_mcp_agent.
//!
//! This module provides TOML-based configuration with environment variable
//! overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of
//! priority):
//!
//! 1. `CHECKPOINT_MCP_CONFIG` environment variable (explicit path)
//! 2. `./config.toml` (current directory)
//! 3. `~/.config/checkpoint-mcp/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\checkpoint-mcp\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `CHECKPOINT_MCP_<SECTION>_<KEY>`
//!
//! Examples:
//! - `CHECKPOINT_MCP_SERVER_PORT=8080`
//! - `CHECKPOINT_MCP_SERVER_TRANSPORT=http`
//! - `CHECKPOINT_MCP_SESSION_TIMEOUT_SECS=3600`
//!
//! The legacy `MCP_DEBUG` variable is also honored as a debug toggle.

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{resolve_config_path, ConfigLoader};
pub use schema::{
    Config, LoggingConfig, MonitorConfig, ServerConfig, SessionConfig, ToolsConfig,
};
