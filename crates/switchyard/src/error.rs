//! Top-level error type of the binary.

use std::io;

use thiserror::Error;

use switchyard_server::{ServeError, StartupError};
use switchyard_telemetry::TelemetryError;

use crate::config::ConfigError;

/// Anything that ends the process with a non-zero exit code.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialized.
    #[error("logging setup failed: {0}")]
    Logging(#[from] TelemetryError),

    /// SIGINT/SIGTERM handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    /// The server could not start.
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// The server failed while running.
    #[error(transparent)]
    Serve(#[from] ServeError),
}

impl AppError {
    /// Returns `true` for failures raised before logging is up, which can
    /// only be reported on stderr.
    #[must_use]
    pub const fn is_pre_logging(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Logging(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: AppError = ConfigError::InvalidValue {
            field: "port",
            reason: "must be set".to_string(),
        }
        .into();
        assert!(err.is_pre_logging());
        assert!(err.to_string().starts_with("failed to load configuration"));
    }

    #[test]
    fn test_logging_error_converts() {
        let err: AppError = TelemetryError::InvalidFormat("xml".to_string()).into();
        assert!(matches!(err, AppError::Logging(_)));
        assert!(err.is_pre_logging());
    }

    #[test]
    fn test_signal_error_is_after_logging() {
        let err = AppError::Signals(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_pre_logging());
    }
}
