//! Server configuration types.
//!
//! This module provides configuration for the gateway server, using the
//! builder pattern for ergonomic construction.
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .api_prefix("/api/v2")
//!     .build();
//!
//! assert_eq!(config.http_addr(), "0.0.0.0:8080");
//! assert_eq!(config.api_prefix(), "/api/v2");
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Default per-call timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default mount prefix of the JSON bridge.
pub const DEFAULT_API_PREFIX: &str = "/api/v1";

/// Default limit on a buffered JSON request body (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    http_addr: String,

    /// How long draining may take before remaining connections are aborted
    shutdown_timeout: Duration,

    /// Upper bound on a single call; a shorter `grpc-timeout` wins
    request_timeout: Option<Duration>,

    /// Whether HTTP/2 prior-knowledge connections are accepted
    http2_enabled: bool,

    /// Mount prefix of the JSON bridge
    api_prefix: String,

    /// Largest JSON request body accepted
    max_body_size: usize,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses and returns the bind address as a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// Returns the drain deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the per-call timeout, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Returns whether HTTP/2 is enabled.
    #[must_use]
    pub fn http2_enabled(&self) -> bool {
        self.http2_enabled
    }

    /// Returns the JSON bridge prefix, normalized to `/segment[/segment..]`.
    #[must_use]
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    /// Returns the JSON request body limit in bytes.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Option<Duration>,
    http2_enabled: bool,
    api_prefix: String,
    max_body_size: usize,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            http2_enabled: true,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Sets the bind address (e.g., "0.0.0.0:8080", "127.0.0.1:0").
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the drain deadline.
    ///
    /// This is the maximum time the server waits for in-flight requests
    /// after a shutdown signal before aborting what is left.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-call timeout. `None` leaves calls unbounded unless the
    /// client sends `grpc-timeout`.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables HTTP/2 support.
    #[must_use]
    pub fn http2_enabled(mut self, enabled: bool) -> Self {
        self.http2_enabled = enabled;
        self
    }

    /// Sets the JSON bridge prefix. Leading and trailing slashes are normalized.
    #[must_use]
    pub fn api_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.api_prefix = normalize_prefix(prefix.as_ref());
        self
    }

    /// Sets the largest JSON request body accepted by the bridge and by
    /// JSON reflection queries.
    #[must_use]
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Builds the [`ServerConfig`].
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
            http2_enabled: self.http2_enabled,
            api_prefix: self.api_prefix,
            max_body_size: self.max_body_size,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes a mount prefix to `/a/b` form. An empty prefix becomes `/`.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
