//! HTTP+JSON bridge.
//!
//! Exposes every unary method at `<prefix>/<Service>/<Method>`, where
//! `<Service>` is the fully qualified name or an unambiguous bare name.
//! Requests go through the same [`MethodHandle::invoke`] path as the binary
//! protocol, with the JSON codec, so handlers cannot tell the two apart.
//!
//! | Condition | HTTP | `code` |
//! |---|---|---|
//! | no such method | 404 | `not_found` |
//! | verb is not `POST` | 405 (`Allow: POST`) | `unimplemented` |
//! | streaming method | 501 | `unimplemented` |
//! | malformed body | 400 | `invalid_argument` |
//! | body over the size limit | 413 | `resource_exhausted` |
//! | handler status | per [`Code::http_status`] | status code name |
//!
//! [`Code::http_status`]: switchyard_core::Code::http_status

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, StatusCode};
use hyper::body::Body;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use switchyard_core::{
    Codec, InvokeError, MethodHandle, MethodKind, RawRequest, RawResponse, RequestContext,
    ServiceRegistry, Status,
};

use crate::body::{self, BoxError, HttpResponse, ReadBodyError};
use crate::config::{normalize_prefix, DEFAULT_MAX_BODY_SIZE};

/// Per-request failures of the JSON bridge.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// No method is mounted at this path.
    #[error("no method at '{0}'")]
    NotFound(String),

    /// The verb is not `POST`.
    #[error("method {0} not allowed, use POST")]
    MethodNotAllowed(Method),

    /// Streaming methods have no JSON mapping.
    #[error("'{method}' is a {kind} method and cannot be called over HTTP+JSON")]
    UnsupportedTranscoding {
        /// Binary path of the method.
        method: String,
        /// Its call kind.
        kind: MethodKind,
    },

    /// The body is not valid JSON for the request type.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The body could not be read or is too large.
    #[error(transparent)]
    Body(#[from] ReadBodyError),

    /// The handler returned a status.
    #[error(transparent)]
    Status(#[from] Status),
}

impl TranscodeError {
    /// Renders the error as a JSON response.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        match self {
            Self::NotFound(_) => body::json_error(&Status::not_found(self.to_string())),
            Self::MethodNotAllowed(_) => {
                let mut response = body::json_error(&Status::unimplemented(self.to_string()));
                *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("POST"));
                response
            }
            Self::UnsupportedTranscoding { .. } => {
                body::json_error(&Status::unimplemented(self.to_string()))
            }
            Self::InvalidBody(_) => body::json_error(&Status::invalid_argument(self.to_string())),
            Self::Body(e) => e.into_json_response(),
            Self::Status(status) => body::json_error(&status),
        }
    }
}

impl From<InvokeError> for TranscodeError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Decode(e) => Self::InvalidBody(e.to_string()),
            InvokeError::Protocol(msg) => Self::InvalidBody(msg),
            InvokeError::Encode(e) => {
                Self::Status(Status::internal(format!("failed to encode response: {e}")))
            }
            InvokeError::Status(status) => Self::Status(status),
        }
    }
}

/// Serves unary methods as JSON over HTTP.
#[derive(Debug, Clone)]
pub struct Transcoder {
    registry: Arc<ServiceRegistry>,
    prefix: String,
    request_timeout: Option<Duration>,
    max_body_size: usize,
    shutdown: CancellationToken,
}

impl Transcoder {
    /// Creates a transcoder mounted at `prefix`.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, prefix: impl AsRef<str>) -> Self {
        Self {
            registry,
            prefix: normalize_prefix(prefix.as_ref()),
            request_timeout: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the upper bound on a single call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the largest request body accepted.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Sets the server-wide token every request token descends from.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Returns the mount prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Maps a request path to a registered method.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::NotFound`] if the path is outside the prefix or
    /// names no registered method.
    pub fn resolve(&self, path: &str) -> Result<&MethodHandle, TranscodeError> {
        let not_found = || TranscodeError::NotFound(path.to_string());

        let rest = if self.prefix == "/" {
            path
        } else {
            path.strip_prefix(self.prefix.as_str()).ok_or_else(not_found)?
        };
        let (service, method) = rest
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(not_found)?;
        if method.is_empty() || method.contains('/') {
            return Err(not_found());
        }

        self.registry
            .lookup(service, method)
            .map_err(|_| not_found())
    }

    /// Handles one JSON call.
    pub async fn handle<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        match self.transcode(request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn transcode<B>(&self, request: Request<B>) -> Result<HttpResponse, TranscodeError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let handle = self.resolve(request.uri().path())?.clone();
        if request.method() != Method::POST {
            return Err(TranscodeError::MethodNotAllowed(request.method().clone()));
        }

        let descriptor = handle.descriptor();
        if !descriptor.kind.is_unary() {
            return Err(TranscodeError::UnsupportedTranscoding {
                method: descriptor.http_path.clone(),
                kind: descriptor.kind,
            });
        }

        let bytes = body::collect_limited(request.into_body(), self.max_body_size).await?;
        let payload = if bytes.iter().all(u8::is_ascii_whitespace) {
            Bytes::from_static(b"{}")
        } else {
            bytes
        };

        let mut ctx = RequestContext::new(descriptor.service.as_str(), descriptor.method.as_str())
            .with_parent_token(&self.shutdown);
        if let Some(timeout) = self.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        let _guard = ctx.cancellation_token().clone().drop_guard();

        match handle.invoke(ctx, Codec::Json, RawRequest::Single(payload)).await? {
            RawResponse::Single(payload) => Ok(body::json_bytes(StatusCode::OK, payload)),
            RawResponse::Stream(_) => Err(Status::internal("unary method returned a stream").into()),
        }
    }
}
