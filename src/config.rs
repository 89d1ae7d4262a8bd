//! Bridge Configuration
//!
//! Handles parsing of native-bridge.toml configuration files and the
//! environment overrides applied on top of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for by [`BridgeConfig::find_and_load`].
pub const CONFIG_FILE: &str = "native-bridge.toml";

/// Environment variable overriding `native.libs_root`.
pub const LIBS_ROOT_ENV: &str = "NATIVE_BRIDGE_LIBS_ROOT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching native-bridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Native library locations
    #[serde(default)]
    pub native: NativeConfig,

    /// Log filtering
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents, then apply
    /// environment overrides.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        let mut config = Self::find_and_load(&cwd)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Apply overrides from `lookup`, normally the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(LIBS_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.native.libs_root = PathBuf::from(root);
        }
    }
}

/// Native library locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Directory holding one subdirectory per native library
    #[serde(default = "default_libs_root")]
    pub libs_root: PathBuf,

    /// Logical name of the encrypted database library
    #[serde(default = "default_database")]
    pub database: String,

    /// Logical name of the compute library
    #[serde(default = "default_compute")]
    pub compute: String,
}

fn default_libs_root() -> PathBuf {
    PathBuf::from("./libs")
}

fn default_database() -> String {
    "crypto-db".to_string()
}

fn default_compute() -> String {
    "fibonacci".to_string()
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            libs_root: default_libs_root(),
            database: default_database(),
            compute: default_compute(),
        }
    }
}

/// Log filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}
