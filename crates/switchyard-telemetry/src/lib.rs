//! Structured logging for Switchyard.
//!
//! Switchyard logs through `tracing`. This crate installs the global
//! subscriber: an `EnvFilter` built from the configured level and either a
//! human-readable or a JSON formatting layer.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchyard_telemetry::{init_logging, LogConfig, LogFormat};
//!
//! let config = LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//! init_logging(&config).expect("logging");
//!
//! tracing::info!(port = 8080, "Server listening");
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
