//! Request and response body helpers.
//!
//! Every surface answers with a [`ResponseBody`]: buffered bodies for JSON
//! and static content, streaming bodies (data frames then trailers) for the
//! binary protocol. Buffered request bodies are read through
//! [`collect_limited`].

use std::convert::Infallible;

use bytes::Bytes;
use http::{header, HeaderValue, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited};
use hyper::body::Body;
use serde::Serialize;
use thiserror::Error;

use switchyard_core::{Code, Status};

/// Type alias for the HTTP response body.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// Boxed error of a request body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Media type of JSON responses.
pub const APPLICATION_JSON: &str = "application/json";

/// Returns an empty body.
#[must_use]
pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new().boxed_unsync()
}

/// Returns a buffered body.
#[must_use]
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).boxed_unsync()
}

/// Builds a JSON response from raw, already encoded bytes.
#[must_use]
pub fn json_bytes(status: StatusCode, bytes: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(full(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(APPLICATION_JSON),
    );
    response
}

/// Builds a JSON response from a serializable value.
#[must_use]
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(bytes) => json_bytes(status, bytes),
        Err(e) => json_error(&Status::internal(format!("failed to encode response: {e}"))),
    }
}

/// JSON error envelope, `{"code": "...", "message": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    /// Status code name.
    pub code: Code,
    /// Human-readable message.
    pub message: &'a str,
}

/// Builds the JSON error response for a status, using the RPC to HTTP table.
#[must_use]
pub fn json_error(status: &Status) -> HttpResponse {
    let body = ErrorBody {
        code: status.code(),
        message: status.message(),
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| {
        br#"{"code":"internal","message":"failed to encode error"}"#.to_vec()
    });
    json_bytes(status.code().http_status(), bytes)
}

/// Failure to buffer a request body.
#[derive(Debug, Error)]
pub enum ReadBodyError {
    /// The body is longer than the limit.
    #[error("request body exceeds {limit} bytes")]
    TooLarge {
        /// Limit in bytes.
        limit: usize,
    },

    /// The transport failed while reading.
    #[error("failed to read request body: {0}")]
    Read(String),
}

impl ReadBodyError {
    /// Renders the error as a JSON response: 413 with `resource_exhausted`
    /// for an oversize body, 400 otherwise.
    #[must_use]
    pub fn into_json_response(self) -> HttpResponse {
        match self {
            Self::TooLarge { .. } => {
                let mut response = json_error(&Status::resource_exhausted(self.to_string()));
                *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
                response
            }
            Self::Read(_) => json_error(&Status::invalid_argument(self.to_string())),
        }
    }
}

/// Buffers a request body, failing once more than `limit` bytes arrive.
pub async fn collect_limited<B>(body: B, limit: usize) -> Result<Bytes, ReadBodyError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ReadBodyError::TooLarge { limit }),
        Err(e) => Err(ReadBodyError::Read(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_bytes(response: HttpResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_json_error_envelope() {
        let response = json_error(&Status::invalid_argument("bad input"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            APPLICATION_JSON
        );

        let value: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(value["code"], "invalid_argument");
        assert_eq!(value["message"], "bad input");
    }

    #[tokio::test]
    async fn test_json_error_uses_translation_table() {
        let response = json_error(&Status::new(Code::Cancelled, "gone"));
        assert_eq!(response.status().as_u16(), 499);

        let response = json_error(&Status::unimplemented("streaming"));
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_collect_limited() {
        let body = Full::new(Bytes::from_static(b"0123456789"));
        assert_eq!(&collect_limited(body, 10).await.unwrap()[..], b"0123456789");

        let body = Full::new(Bytes::from_static(b"0123456789"));
        let err = collect_limited(body, 9).await.unwrap_err();
        assert!(matches!(err, ReadBodyError::TooLarge { limit: 9 }));

        let response = err.into_json_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let value: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(value["code"], "resource_exhausted");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let response = Response::new(empty());
        assert!(body_bytes(response).await.is_empty());
    }
}
