//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use std::path::{Path, PathBuf};

use crate::transport::TransportKind;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "CHECKPOINT_MCP";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "CHECKPOINT_MCP_CONFIG";

/// Directory name under the platform config root
const APP_DIR_NAME: &str = "checkpoint-mcp";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `CHECKPOINT_MCP_CONFIG` environment variable (explicit path)
    /// 2. `./config.toml` (current directory)
    /// 3. `~/.config/checkpoint-mcp/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\checkpoint-mcp\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("No config file path set".to_string()))?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    if let Some(config_dir) = get_config_dir() {
        let app_config = config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `CHECKPOINT_MCP_<SECTION>_<KEY>`
/// For example:
/// - `CHECKPOINT_MCP_SERVER_PORT=8080`
/// - `CHECKPOINT_MCP_SERVER_TRANSPORT=http`
/// - `CHECKPOINT_MCP_LOGGING_DEBUG=1`
///
/// The legacy `MCP_DEBUG` variable is also honored as a debug toggle.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Server overrides
    if let Ok(val) = std::env::var(format!("{}_SERVER_HOST", ENV_PREFIX)) {
        config.server.host = val;
    }
    if let Ok(val) = std::env::var(format!("{}_SERVER_PORT", ENV_PREFIX)) {
        config.server.port = val.parse().map_err(|_| {
            ConfigError::env_parse(format!("{}_SERVER_PORT", ENV_PREFIX), "Invalid port number")
        })?;
    }
    if let Ok(val) = std::env::var(format!("{}_SERVER_TRANSPORT", ENV_PREFIX)) {
        config.server.transport = val.parse::<TransportKind>().map_err(|e| {
            ConfigError::env_parse(format!("{}_SERVER_TRANSPORT", ENV_PREFIX), e)
        })?;
    }

    // Session overrides
    if let Ok(val) = std::env::var(format!("{}_SESSION_TIMEOUT_SECS", ENV_PREFIX)) {
        config.session.timeout_secs = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_SESSION_TIMEOUT_SECS", ENV_PREFIX),
                "Invalid timeout",
            )
        })?;
    }

    // Monitor overrides
    if let Ok(val) = std::env::var(format!("{}_MONITOR_PING_INTERVAL_SECS", ENV_PREFIX)) {
        config.monitor.ping_interval_secs = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_MONITOR_PING_INTERVAL_SECS", ENV_PREFIX),
                "Invalid interval",
            )
        })?;
    }
    if let Ok(val) = std::env::var(format!("{}_MONITOR_MAX_RECONNECT_ATTEMPTS", ENV_PREFIX)) {
        config.monitor.max_reconnect_attempts = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_MONITOR_MAX_RECONNECT_ATTEMPTS", ENV_PREFIX),
                "Invalid attempt count",
            )
        })?;
    }

    // Tools overrides
    if let Ok(val) = std::env::var(format!("{}_TOOLS_ROTATE_NAMES", ENV_PREFIX)) {
        config.tools.rotate_names = parse_bool(&val);
    }

    // Logging overrides (also support legacy MCP_DEBUG)
    if let Ok(val) = std::env::var(format!("{}_LOGGING_LEVEL", ENV_PREFIX)) {
        config.logging.level = val;
    }
    if let Ok(val) =
        std::env::var(format!("{}_LOGGING_DEBUG", ENV_PREFIX)).or_else(|_| std::env::var("MCP_DEBUG"))
    {
        config.logging.debug = parse_bool(&val);
    }

    Ok(())
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn validate(config: &Config) -> ConfigResult<()> {
    if config.session.timeout_secs == 0 {
        return Err(ConfigError::validation(
            "session.timeout_secs",
            "must be at least 1 second",
        ));
    }
    if config.monitor.max_reconnect_attempts == 0 {
        return Err(ConfigError::validation(
            "monitor.max_reconnect_attempts",
            "must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().server.port, 7850);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("CHECKPOINT_MCP_SERVER_PORT", "9999");
        env::set_var("CHECKPOINT_MCP_SERVER_TRANSPORT", "http");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().server.port, 9999);
        assert_eq!(loader.config().server.transport, TransportKind::Http);

        env::remove_var("CHECKPOINT_MCP_SERVER_PORT");
        env::remove_var("CHECKPOINT_MCP_SERVER_TRANSPORT");
    }

    #[test]
    #[serial]
    fn test_legacy_debug_env() {
        env::set_var("MCP_DEBUG", "1");

        let loader = ConfigLoader::with_defaults();
        assert!(loader.config().logging.debug);
        assert_eq!(loader.config().logging.directive(), "debug");

        env::remove_var("MCP_DEBUG");
    }

    #[test]
    #[serial]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut loader = ConfigLoader::with_defaults();
        loader.config.server.port = 6123;
        loader.save_to(&path).expect("save");

        let loaded = ConfigLoader::load_from(&path).expect("load");
        assert_eq!(loaded.config().server.port, 6123);
    }

    #[test]
    #[serial]
    fn test_zero_timeout_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\ntimeout_secs = 0\n").expect("write");

        let result = ConfigLoader::load_from(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
