//! Service contract types.
//!
//! A contract describes what a service offers without saying anything about
//! how it is reached: method names, request/response shapes, and call kind.
//! Descriptors are immutable once a service is registered.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Shape of a method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// One request, one response.
    Unary,
    /// A stream of requests, one response.
    ClientStreaming,
    /// One request, a stream of responses.
    ServerStreaming,
    /// A stream of requests, a stream of responses.
    BidiStreaming,
}

impl MethodKind {
    /// Returns `true` if the client sends a stream.
    #[must_use]
    pub const fn client_streams(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    /// Returns `true` if the server sends a stream.
    #[must_use]
    pub const fn server_streams(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }

    /// Returns `true` for unary calls.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Unary)
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unary => "unary",
            Self::ClientStreaming => "client_streaming",
            Self::ServerStreaming => "server_streaming",
            Self::BidiStreaming => "bidi_streaming",
        };
        f.write_str(name)
    }
}

/// Name and JSON Schema of a request or response message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageShape {
    /// Type name as reported by `schemars`.
    pub name: String,
    /// JSON Schema document for the type.
    pub schema: serde_json::Value,
}

impl MessageShape {
    /// Derives the shape of `T` from its `JsonSchema` implementation.
    #[must_use]
    pub fn of<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: T::schema_name(),
            schema: serde_json::to_value(schema).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A fully qualified service name, `package.Service`.
///
/// The package may contain dots (`api.v1.APIService`); the service part is
/// everything after the last dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName {
    full: String,
    split: usize,
}

impl ServiceName {
    /// Parses a fully qualified service name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidServiceName`] if the name has no
    /// package, an empty segment, or characters outside `[A-Za-z0-9_.]`.
    pub fn parse(name: impl Into<String>) -> Result<Self, RegistryError> {
        let full = name.into();
        let valid_chars = full
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        let segments_ok = full.split('.').all(|segment| !segment.is_empty());

        match full.rfind('.') {
            Some(split) if valid_chars && segments_ok => Ok(Self { full, split }),
            _ => Err(RegistryError::InvalidServiceName(full)),
        }
    }

    /// Returns the full name, `package.Service`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Returns the package part, `package`.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.full[..self.split]
    }

    /// Returns the bare service name, `Service`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.full[self.split + 1..]
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.full
    }
}

/// Immutable description of one registered method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Owning service.
    pub service: ServiceName,
    /// Method name, unique within the service.
    pub method: String,
    /// Canonical binary path, `/<package>.<Service>/<Method>`.
    pub http_path: String,
    /// Request message shape.
    pub request_shape: MessageShape,
    /// Response message shape.
    pub response_shape: MessageShape,
    /// Call kind.
    pub kind: MethodKind,
}

impl MethodDescriptor {
    /// Builds a descriptor for `method` on `service`.
    #[must_use]
    pub fn new(
        service: &ServiceName,
        method: impl Into<String>,
        kind: MethodKind,
        request_shape: MessageShape,
        response_shape: MessageShape,
    ) -> Self {
        let method = method.into();
        Self {
            http_path: format!("/{}/{}", service, method),
            service: service.clone(),
            method,
            request_shape,
            response_shape,
            kind,
        }
    }
}
