use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::PtyConfig;

/// Environment variable overriding `read_blocking` (`0` or `1`).
pub const BLOCK_ENV_VAR: &str = "PTYSTREAM_BLOCK";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl PtyConfig {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/ptystream/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("ptystream").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// - If the file doesn't exist, returns `PtyConfig::default()`.
    /// - If the file exists, parses it as TOML and validates.
    /// - `PTYSTREAM_BLOCK` overrides `read_blocking` in both cases.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            PtyConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: PtyConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Applies `PTYSTREAM_BLOCK`; unrecognised values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(BLOCK_ENV_VAR) {
            match value.trim() {
                "0" => self.read_blocking = false,
                "1" => self.read_blocking = true,
                other => {
                    tracing::debug!("Ignoring {}={:?}", BLOCK_ENV_VAR, other);
                }
            }
        }
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Poll interval and read chunk are non-zero
    /// - Default dimensions are non-zero
    /// - The bridge port is outside the privileged range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }

        if self.read_chunk == 0 {
            return Err(ConfigError::ValidationError {
                message: "read_chunk must be greater than zero".to_string(),
            });
        }

        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigError::ValidationError {
                message: format!("Invalid default dimensions {}x{}", self.rows, self.cols),
            });
        }

        if self.bridge_port < 1024 {
            return Err(ConfigError::ValidationError {
                message: format!("bridge_port {} is in the privileged range", self.bridge_port),
            });
        }

        Ok(())
    }
}
