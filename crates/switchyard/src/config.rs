//! Application configuration.
//!
//! Layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config <path>`)
//! 3. `.env` file in the working directory
//! 4. Environment variables
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `PORT` | `port` | `8080` |
//! | `LOG_LEVEL` | `log_level` | `debug` |
//! | `LOG_FORMAT` | `log_format` | `pretty` |
//! | `API_PREFIX` | `api_prefix` | `/api/v1` |
//! | `STATIC_DIR` | `static_dir` | unset |
//! | `SHUTDOWN_TIMEOUT_SECS` | `shutdown_timeout_secs` | `5` |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use switchyard_server::{
    ServerConfig, DEFAULT_API_PREFIX, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use switchyard_telemetry::{LogConfig, LogFormat};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", path.display())]
    FileNotFound {
        /// Path that was tried.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        /// Path that was tried.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`AppConfig`].
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// The `.env` file exists but could not be loaded.
    #[error("failed to load .env file: {0}")]
    Dotenv(String),

    /// An environment variable has an unusable value.
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Value as found.
        value: String,
        /// Parse error.
        reason: String,
    },

    /// A field failed validation.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,
    /// Log level name or filter directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Mount prefix of the JSON bridge.
    pub api_prefix: String,
    /// Directory served for unmatched paths; JSON 404 when unset.
    pub static_dir: Option<PathBuf>,
    /// Drain deadline in seconds.
    pub shutdown_timeout_secs: u64,
    /// Per-call deadline in seconds; `0` disables it.
    pub request_timeout_secs: u64,
    /// Accept HTTP/2 prior-knowledge connections.
    pub http2: bool,
    /// Expose the reflection service.
    pub reflection: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "debug".to_string(),
            log_format: LogFormat::Pretty,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            static_dir: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            http2: true,
            reflection: true,
        }
    }
}

impl AppConfig {
    /// Loads every layer and validates the result.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; all of them are startup failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ConfigError::Dotenv(e.to_string())),
        }

        let config = config.with_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_toml(&contents)
    }

    /// Parses TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            self.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("LOG_FORMAT") {
            self.log_format = parse_env("LOG_FORMAT", &value)?;
        }
        if let Some(value) = lookup("API_PREFIX") {
            self.api_prefix = value;
        }
        if let Some(value) = lookup("STATIC_DIR") {
            self.static_dir = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = lookup("SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = parse_env("SHUTDOWN_TIMEOUT_SECS", &value)?;
        }
        Ok(self)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "api_prefix",
                reason: format!("'{}' must start with '/'", self.api_prefix),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "log_level",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(dir) = &self.static_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidValue {
                    field: "static_dir",
                    reason: format!("{} is not a directory", dir.display()),
                });
            }
        }
        Ok(())
    }

    /// Returns `host:port`.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Server settings derived from this configuration.
    pub fn server_config(&self) -> ServerConfig {
        let request_timeout =
            (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs));
        ServerConfig::builder()
            .http_addr(self.bind_addr())
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .request_timeout(request_timeout)
            .http2_enabled(self.http2)
            .api_prefix(&self.api_prefix)
            .build()
    }

    /// Logging settings derived from this configuration.
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level.clone(), self.log_format)
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
