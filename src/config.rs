//! Configuration for the recast binaries.

use std::path::Path;

use serde::Deserialize;

use crate::error::{RecastError, Result};

/// Feed store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the feed store.
    #[serde(default = "default_store_root")]
    pub root: String,
}

fn default_store_root() -> String {
    "data/store".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

/// Demo service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8007
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Refuse loopback and private targets. Leave this on.
    #[serde(default = "default_be_safe")]
    pub be_safe: bool,
}

fn default_be_safe() -> bool {
    true
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            be_safe: default_be_safe(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional file to also append logs into.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| RecastError::Config(e.to_string()))
    }

    /// Load from a TOML file if it exists, falling back to defaults, and
    /// apply environment overrides either way.
    pub fn load_or_default(path: impl AsRef<Path>) -> Config {
        let mut config = match Config::load(&path) {
            Ok(config) => config,
            Err(_) => Config::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("RECAST_STORE_ROOT") {
            self.store.root = root;
        }
        if let Ok(level) = std::env::var("RECAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(port) = std::env::var("RECAST_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.root, "data/store");
        assert_eq!(config.server.port, 8007);
        assert!(config.fetch.be_safe);
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            "[store]\nroot = \"/var/feeds\"\n\n[logging]\nlevel = \"info\"\n",
        )
        .unwrap();
        assert_eq!(config.store.root, "/var/feeds");
        assert_eq!(config.logging.level, "info");
        // untouched sections fall back to defaults
        assert_eq!(config.server.port, 8007);
    }

    #[test]
    fn test_bad_toml_is_a_config_error() {
        let result: Result<Config> =
            toml::from_str("store = 12").map_err(|e| RecastError::Config(e.to_string()));
        assert!(matches!(result, Err(RecastError::Config(_))));
    }
}
