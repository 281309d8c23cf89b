//! Server error types.
//!
//! Startup failures and listener failures are process-fatal; everything that
//! goes wrong inside a single request is rendered into that request's
//! response instead and never surfaces here.

use std::time::Duration;

use thiserror::Error;

use switchyard_core::RegistryError;

/// Fatal errors raised before the server starts accepting connections.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address that was tried.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configured address does not parse.
    #[error("invalid bind address '{addr}': {reason}")]
    InvalidAddress {
        /// Address as configured.
        addr: String,
        /// Parse error.
        reason: String,
    },

    /// A service could not be registered.
    #[error("service registration failed: {0}")]
    Registry(#[from] RegistryError),

    /// The reflection service list is invalid.
    #[error("reflection setup failed: {0}")]
    Reflection(#[from] ReflectionError),
}

/// Errors raised while building the reflection provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectionError {
    /// A name in the static service list is not registered.
    #[error("service '{0}' is listed for reflection but not registered")]
    UnknownService(String),
}

/// Fatal errors raised while serving.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener failed with a non-transient error.
    #[error("listener failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// Draining did not finish before the deadline.
///
/// Recorded in the shutdown report; it does not fail the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shutdown timed out after {timeout:?} with {remaining} connection(s) still open")]
pub struct ShutdownTimeout {
    /// The drain deadline that elapsed.
    pub timeout: Duration,
    /// Connections aborted when it elapsed.
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_display() {
        let err = StartupError::from(RegistryError::DuplicateService("pkg.Greeter".into()));
        assert_eq!(
            err.to_string(),
            "service registration failed: service 'pkg.Greeter' is already registered"
        );

        let err = StartupError::from(ReflectionError::UnknownService("pkg.Nope".into()));
        assert!(err.to_string().contains("pkg.Nope"));
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = ShutdownTimeout {
            timeout: Duration::from_secs(5),
            remaining: 2,
        };
        assert_eq!(
            err.to_string(),
            "shutdown timed out after 5s with 2 connection(s) still open"
        );
    }
}
