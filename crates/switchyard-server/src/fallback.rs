//! Catch-all surface for paths no other route claims.

use std::future::Future;
use std::pin::Pin;

use http::request::Parts;

use switchyard_core::Status;

use crate::body::{self, HttpResponse};

/// Future returned by [`FallbackHandler::call`].
pub type FallbackFuture = Pin<Box<dyn Future<Output = HttpResponse> + Send>>;

/// Content handler for unmatched paths.
///
/// The request body is not forwarded; fallback content is read-only.
pub trait FallbackHandler: Send + Sync + 'static {
    /// Answers one request.
    fn call(&self, request: &Parts) -> FallbackFuture;
}

/// Answers every request with a JSON 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl FallbackHandler for NotFound {
    fn call(&self, request: &Parts) -> FallbackFuture {
        let status = Status::not_found(format!("no route for {}", request.uri.path()));
        Box::pin(async move { body::json_error(&status) })
    }
}
