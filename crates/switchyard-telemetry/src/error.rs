//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The log level or filter directive could not be parsed.
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    /// The log format name is not recognized.
    #[error("Invalid log format '{0}': expected 'pretty' or 'json'")]
    InvalidFormat(String),
}
