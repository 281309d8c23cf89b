//! Error types for registry construction and handler invocation.

use thiserror::Error;

use crate::codec::CodecError;
use crate::status::Status;

/// Errors raised while building or querying the service registry.
///
/// Construction variants (`DuplicateService`, `DuplicateMethod`,
/// `InvalidServiceName`) are startup failures. Lookup variants
/// (`ServiceNotFound`, `MethodNotFound`) are per-request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A service with this name is already registered.
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    /// A service definition declares the same method twice.
    #[error("method '{method}' is declared twice on service '{service}'")]
    DuplicateMethod {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
    },

    /// The name is not a fully qualified `package.Service` name.
    #[error("invalid service name '{0}': expected 'package.Service'")]
    InvalidServiceName(String),

    /// No service with this name is registered.
    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("method '{method}' not found on service '{service}'")]
    MethodNotFound {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
    },
}

impl RegistryError {
    /// Converts a lookup failure into the status answered on the wire.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            Self::ServiceNotFound(_) | Self::MethodNotFound { .. } => {
                Status::unimplemented(self.to_string())
            }
            _ => Status::internal(self.to_string()),
        }
    }
}

/// Failure of a single erased handler invocation.
///
/// Each protocol surface renders these differently: a decode failure is a
/// protocol error on the binary surface but a 400 on the JSON bridge.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The request payload could not be decoded. The handler was not invoked.
    #[error("failed to decode request: {0}")]
    Decode(#[source] CodecError),

    /// The response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[source] CodecError),

    /// The request did not match the method's call shape.
    #[error("{0}")]
    Protocol(String),

    /// The handler (or the invocation wrapper) returned a status.
    #[error(transparent)]
    Status(#[from] Status),
}

impl InvokeError {
    /// Renders this error as a status for the binary protocol.
    #[must_use]
    pub fn into_status(self) -> Status {
        match self {
            Self::Decode(err) => Status::protocol_error(err),
            Self::Protocol(msg) => Status::protocol_error(msg),
            Self::Encode(err) => Status::internal(format!("failed to encode response: {err}")),
            Self::Status(status) => status,
        }
    }
}
