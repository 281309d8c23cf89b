//! Binary RPC surface (gRPC framing over HTTP/2, HTTP/1.1 for unary calls).
//!
//! A request is `POST /<package>.<Service>/<Method>` with
//! `content-type: application/grpc[+codec]` and a body of length-prefixed
//! messages: one flag byte (0 = uncompressed), a big-endian `u32` length,
//! then the payload. The response carries data frames in the same framing
//! followed by `grpc-status` / `grpc-message` trailers.
//!
//! Anything that cannot be decoded is rejected with a protocol error before
//! the handler runs. Errors raised before any message is produced are sent
//! trailers-only: the status sits in the header block and the body is empty.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};

use switchyard_core::streaming;
use switchyard_core::{
    Code, Codec, RawMessages, RawRequest, RawResponse, RequestContext, ServiceRegistry, Status,
};

use crate::body::{self, BoxError, HttpResponse, ReadBodyError, ResponseBody};

/// Largest accepted message payload.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const FRAME_HEADER_LEN: usize = 5;

/// Header carrying the numeric status.
pub const GRPC_STATUS: &str = "grpc-status";

/// Header carrying the percent-encoded status message.
pub const GRPC_MESSAGE: &str = "grpc-message";

/// Header carrying the client's call timeout.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Errors in the length-prefixed message framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The compressed flag is set; compression is not negotiated.
    #[error("compressed messages are not supported")]
    Compressed,

    /// The flag byte is neither 0 nor 1.
    #[error("invalid frame flag {0:#04x}")]
    InvalidFlag(u8),

    /// The declared length exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// The body ended inside a frame.
    #[error("truncated message frame")]
    Truncated,
}

/// Prefixes `payload` with an uncompressed frame header.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    // payloads are bounded by MAX_MESSAGE_SIZE well below u32::MAX
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    buf.put_u8(0);
    buf.put_u32(len);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    match buf[0] {
        0 => {}
        1 => return Err(FrameError::Compressed),
        flag => return Err(FrameError::InvalidFlag(flag)),
    }
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if buf.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Splits a fully buffered body into its messages.
pub fn decode_frames(body: &[u8]) -> Result<Vec<Bytes>, FrameError> {
    let mut buf = BytesMut::from(body);
    let mut messages = Vec::new();
    while let Some(message) = decode_frame(&mut buf)? {
        messages.push(message);
    }
    if buf.is_empty() {
        Ok(messages)
    } else {
        Err(FrameError::Truncated)
    }
}

/// Parses a `grpc-timeout` value: up to eight digits and a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
#[must_use]
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Percent-encodes a status message for the `grpc-message` trailer.
///
/// Printable ASCII other than `%` passes through; every other byte is
/// written as `%XX`.
#[must_use]
pub fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn status_headers(code: Code, message: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(GRPC_STATUS, HeaderValue::from(code.as_i32()));
    if !message.is_empty() {
        // percent_encode only emits visible ASCII
        if let Ok(value) = HeaderValue::from_str(&percent_encode(message)) {
            headers.insert(GRPC_MESSAGE, value);
        }
    }
    headers
}

/// Builds a trailers-only error response.
#[must_use]
pub fn trailers_only(status: &Status, content_type: &'static str) -> HttpResponse {
    trailers_only_with(StatusCode::OK, status, content_type)
}

fn trailers_only_with(
    http_status: StatusCode,
    status: &Status,
    content_type: &'static str,
) -> HttpResponse {
    let mut response = Response::new(body::empty());
    *response.status_mut() = http_status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.extend(status_headers(status.code(), status.message()));
    response
}

type FrameResult = Result<Frame<Bytes>, Infallible>;

/// Turns a message stream into data frames followed by status trailers.
///
/// The first error item ends the body with that status. `guard` is dropped
/// when the body completes or is dropped.
fn message_body(messages: RawMessages, guard: Option<DropGuard>) -> ResponseBody {
    let frames = stream::unfold(Some((messages, guard)), |state| async move {
        let (mut messages, guard) = state?;
        let frame = match messages.next().await {
            Some(Ok(payload)) => {
                let frame: FrameResult = Ok(Frame::data(encode_frame(&payload)));
                return Some((frame, Some((messages, guard))));
            }
            Some(Err(status)) => Frame::trailers(status_headers(status.code(), status.message())),
            None => Frame::trailers(status_headers(Code::Ok, "")),
        };
        drop(guard);
        Some((FrameResult::Ok(frame), None))
    });
    StreamBody::new(frames).boxed_unsync()
}

/// Decodes a request body incrementally into messages.
fn request_messages<B>(body: B) -> RawMessages
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: fmt::Display + Send,
{
    let state = (Box::pin(body), BytesMut::new());
    Box::pin(stream::unfold(Some(state), |state| async move {
        let (mut body, mut buf) = state?;
        loop {
            match decode_frame(&mut buf) {
                Ok(Some(message)) => return Some((Ok(message), Some((body, buf)))),
                Ok(None) => {}
                Err(e) => return Some((Err(Status::protocol_error(e)), None)),
            }
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        buf.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => {
                    let status = Status::protocol_error(format!("failed to read request body: {e}"));
                    return Some((Err(status), None));
                }
                None if buf.is_empty() => return None,
                None => return Some((Err(Status::protocol_error(FrameError::Truncated)), None)),
            }
        }
    }))
}

/// Serves the binary protocol against a registry.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use switchyard_core::ServiceRegistry;
/// use switchyard_server::GrpcHandler;
///
/// let handler = GrpcHandler::new(Arc::new(ServiceRegistry::new()));
/// assert!(handler.request_timeout().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct GrpcHandler {
    registry: Arc<ServiceRegistry>,
    request_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl GrpcHandler {
    /// Creates a handler with no call timeout and a detached shutdown token.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            request_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the upper bound on a single call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the server-wide token every request token descends from.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Returns the configured call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Returns the registry served by this handler.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Handles one binary RPC call.
    pub async fn handle<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + fmt::Display + Send,
    {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let Some(codec) = Codec::from_grpc_content_type(content_type) else {
            let status = Status::protocol_error(format!("unsupported content-type '{content_type}'"));
            return trailers_only_with(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                &status,
                "application/grpc",
            );
        };
        let content_type = codec.grpc_content_type();

        if request.method() != Method::POST {
            let status = Status::protocol_error(format!("method {} is not POST", request.method()));
            return trailers_only(&status, content_type);
        }

        let path = request.uri().path().to_string();
        let Some((service, method)) = path.trim_start_matches('/').split_once('/') else {
            return trailers_only(&Status::unimplemented(format!("unknown path '{path}'")), content_type);
        };
        let handle = match self.registry.lookup(service, method) {
            Ok(handle) => handle.clone(),
            Err(e) => return trailers_only(&e.to_status(), content_type),
        };
        let descriptor = handle.descriptor();

        let mut ctx = RequestContext::new(descriptor.service.as_str(), descriptor.method.as_str())
            .with_parent_token(&self.shutdown);
        if let Some(timeout) = self.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(value) = request.headers().get(GRPC_TIMEOUT) {
            match value.to_str().ok().and_then(parse_grpc_timeout) {
                Some(timeout) => ctx = ctx.with_timeout(timeout),
                None => tracing::debug!(value = ?value, "Ignoring malformed grpc-timeout"),
            }
        }
        let guard = ctx.cancellation_token().clone().drop_guard();

        let raw = if descriptor.kind.client_streams() {
            RawRequest::Stream(request_messages(request.into_body()))
        } else {
            match read_single(request.into_body()).await {
                Ok(payload) => RawRequest::Single(payload),
                Err(status) => return trailers_only(&status, content_type),
            }
        };

        match handle.invoke(ctx, codec, raw).await {
            Ok(RawResponse::Single(payload)) => {
                respond(content_type, message_body(streaming::iter([payload]), None))
            }
            Ok(RawResponse::Stream(messages)) => {
                respond(content_type, message_body(messages, Some(guard)))
            }
            Err(e) => trailers_only(&e.into_status(), content_type),
        }
    }
}

fn respond(content_type: &'static str, body: ResponseBody) -> HttpResponse {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Collects a body that must carry exactly one message.
///
/// Reading stops once the body outgrows one maximum-size frame.
async fn read_single<B>(body: B) -> Result<Bytes, Status>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let bytes = body::collect_limited(body, MAX_MESSAGE_SIZE + FRAME_HEADER_LEN)
        .await
        .map_err(|e| match e {
            ReadBodyError::TooLarge { .. } => Status::resource_exhausted(e.to_string()),
            ReadBodyError::Read(_) => Status::protocol_error(e),
        })?;
    let mut messages = decode_frames(&bytes).map_err(Status::protocol_error)?;
    if messages.len() != 1 {
        return Err(Status::protocol_error(format!(
            "expected exactly one request message, got {}",
            messages.len()
        )));
    }
    Ok(messages.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde::{Deserialize, Serialize};
    use switchyard_core::ServiceDefinition;

    #[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
    struct PingRequest {
        message: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
    struct PingResponse {
        message: String,
    }

    #[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
    struct Number {
        value: u32,
    }

    fn handler() -> GrpcHandler {
        let mut registry = ServiceRegistry::new();
        registry
            .register(
                ServiceDefinition::new("test.v1.Greeter")
                    .unary("Ping", |_ctx, req: PingRequest| async move {
                        Ok(PingResponse {
                            message: format!("Pong: {}", req.message),
                        })
                    })
                    .unary("Fail", |_ctx, _req: PingRequest| async move {
                        Err::<PingResponse, _>(Status::not_found("no such greeting: café"))
                    })
                    .unary("Slow", |_ctx, _req: PingRequest| async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(PingResponse {
                            message: "late".into(),
                        })
                    })
                    .server_streaming("Count", |_ctx, req: Number| async move {
                        Ok(streaming::iter((1..=req.value).map(|value| Number { value })))
                    })
                    .client_streaming(
                        "Sum",
                        |_ctx, requests: switchyard_core::Streaming<Number>| async move {
                            let mut requests = requests;
                            let mut total = 0;
                            while let Some(number) = requests.next().await {
                                total += number?.value;
                            }
                            Ok(Number { value: total })
                        },
                    ),
            )
            .unwrap();
        GrpcHandler::new(Arc::new(registry))
    }

    fn call(path: &str, content_type: &str, body: Bytes) -> Request<Full<Bytes>> {
        Request::post(path)
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(body))
            .unwrap()
    }

    fn frames<T: Serialize>(codec: Codec, messages: &[T]) -> Bytes {
        let mut body = BytesMut::new();
        for message in messages {
            body.extend_from_slice(&encode_frame(&codec.encode(message).unwrap()));
        }
        body.freeze()
    }

    async fn read(response: HttpResponse) -> (Vec<Bytes>, HeaderMap) {
        let collected = response.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned().unwrap_or_default();
        let messages = decode_frames(&collected.to_bytes()).unwrap();
        (messages, trailers)
    }

    #[test]
    fn test_frame_round_trip() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"abc"));
        buf.extend_from_slice(&encode_frame(b""));

        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), Bytes::new());
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_errors() {
        let mut compressed = BytesMut::from(&[1u8, 0, 0, 0, 0][..]);
        assert_eq!(decode_frame(&mut compressed), Err(FrameError::Compressed));

        let mut bad_flag = BytesMut::from(&[7u8, 0, 0, 0, 0][..]);
        assert_eq!(decode_frame(&mut bad_flag), Err(FrameError::InvalidFlag(7)));

        let mut huge = BytesMut::from(&[0u8, 0xff, 0xff, 0xff, 0xff][..]);
        assert!(matches!(decode_frame(&mut huge), Err(FrameError::TooLarge { .. })));

        assert_eq!(decode_frames(&[0, 0, 0, 0, 4, b'a']), Err(FrameError::Truncated));
        assert_eq!(decode_frames(&[0, 0]), Err(FrameError::Truncated));
    }

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("99n"), Some(Duration::from_nanos(99)));

        for bad in ["", "S", "5", "5s", "-5S", "123456789S", "1.5S"] {
            assert_eq!(parse_grpc_timeout(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("plain text"), "plain text");
        assert_eq!(percent_encode("100%"), "100%25");
        assert_eq!(percent_encode("café"), "caf%C3%A9");
        assert_eq!(percent_encode("a\nb"), "a%0Ab");
    }

    #[tokio::test]
    async fn test_unary_msgpack() {
        let body = frames(Codec::MsgPack, &[PingRequest { message: "hi".into() }]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Ping", "application/grpc", body))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/grpc+msgpack"
        );
        let (messages, trailers) = read(response).await;
        assert_eq!(messages.len(), 1);
        let reply: PingResponse = Codec::MsgPack.decode(&messages[0]).unwrap();
        assert_eq!(reply.message, "Pong: hi");
        assert_eq!(trailers.get(GRPC_STATUS).unwrap(), "0");
        assert!(trailers.get(GRPC_MESSAGE).is_none());
    }

    #[tokio::test]
    async fn test_unary_json_codec() {
        let body = frames(Codec::Json, &[PingRequest { message: "json".into() }]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Ping", "application/grpc+json", body))
            .await;

        let (messages, _) = read(response).await;
        assert_eq!(&messages[0][..], br#"{"message":"Pong: json"}"#);
    }

    #[tokio::test]
    async fn test_unknown_content_type() {
        let response = handler()
            .handle(call("/test.v1.Greeter/Ping", "text/plain", Bytes::new()))
            .await;

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "13");
        let message = response.headers().get(GRPC_MESSAGE).unwrap().to_str().unwrap();
        assert!(message.starts_with("protocol error:"));
    }

    #[tokio::test]
    async fn test_unknown_method_unimplemented() {
        let body = frames(Codec::MsgPack, &[PingRequest { message: "hi".into() }]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Nope", "application/grpc", body.clone()))
            .await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "12");

        let response = handler()
            .handle(call("/test.v1.Missing/Ping", "application/grpc", body))
            .await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "12");
    }

    #[tokio::test]
    async fn test_handler_status_is_trailers_only() {
        let body = frames(Codec::MsgPack, &[PingRequest { message: "hi".into() }]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Fail", "application/grpc", body))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "5");
        assert_eq!(
            response.headers().get(GRPC_MESSAGE).unwrap(),
            "no such greeting: caf%C3%A9"
        );
        let (messages, _) = read(response).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_protocol_errors_skip_handler() {
        let h = handler();

        let truncated = Bytes::from_static(&[0, 0, 0, 0, 9, 1]);
        let response = h
            .handle(call("/test.v1.Greeter/Ping", "application/grpc", truncated))
            .await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "13");

        let two = frames(
            Codec::MsgPack,
            &[
                PingRequest { message: "a".into() },
                PingRequest { message: "b".into() },
            ],
        );
        let response = h.handle(call("/test.v1.Greeter/Ping", "application/grpc", two)).await;
        let message = response.headers().get(GRPC_MESSAGE).unwrap().to_str().unwrap();
        assert!(message.contains("exactly one request message"));

        let garbage = encode_frame(b"\xc1\xc1");
        let response = h
            .handle(call("/test.v1.Greeter/Ping", "application/grpc", garbage))
            .await;
        let message = response.headers().get(GRPC_MESSAGE).unwrap().to_str().unwrap();
        assert!(message.starts_with("protocol error:"));
    }

    #[tokio::test]
    async fn test_oversize_unary_body_is_resource_exhausted() {
        let chunk = encode_frame(&vec![0; MAX_MESSAGE_SIZE / 2 + 1]);
        let mut body = BytesMut::new();
        body.extend_from_slice(&chunk);
        body.extend_from_slice(&chunk);

        let response = handler()
            .handle(call("/test.v1.Greeter/Ping", "application/grpc", body.freeze()))
            .await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "8");
        let (messages, _) = read(response).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_non_post_is_protocol_error() {
        let request = Request::get("/test.v1.Greeter/Ping")
            .header(header::CONTENT_TYPE, "application/grpc")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler().handle(request).await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "13");
    }

    #[tokio::test]
    async fn test_server_streaming() {
        let body = frames(Codec::MsgPack, &[Number { value: 3 }]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Count", "application/grpc", body))
            .await;

        let (messages, trailers) = read(response).await;
        let values: Vec<u32> = messages
            .iter()
            .map(|m| Codec::MsgPack.decode::<Number>(m).unwrap().value)
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(trailers.get(GRPC_STATUS).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_client_streaming() {
        let body = frames(
            Codec::MsgPack,
            &[Number { value: 1 }, Number { value: 2 }, Number { value: 39 }],
        );
        let response = handler()
            .handle(call("/test.v1.Greeter/Sum", "application/grpc", body))
            .await;

        let (messages, trailers) = read(response).await;
        let total: Number = Codec::MsgPack.decode(&messages[0]).unwrap();
        assert_eq!(total.value, 42);
        assert_eq!(trailers.get(GRPC_STATUS).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_client_streaming_truncated_body() {
        let mut body = BytesMut::from(&frames(Codec::MsgPack, &[Number { value: 1 }])[..]);
        body.extend_from_slice(&[0, 0, 0]);
        let response = handler()
            .handle(call("/test.v1.Greeter/Sum", "application/grpc", body.freeze()))
            .await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "13");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grpc_timeout_sets_deadline() {
        let body = frames(Codec::MsgPack, &[PingRequest { message: "hi".into() }]);
        let request = Request::post("/test.v1.Greeter/Slow")
            .header(header::CONTENT_TYPE, "application/grpc")
            .header(GRPC_TIMEOUT, "50m")
            .body(Full::new(body))
            .unwrap();
        let response = handler().handle(request).await;
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_grpc_timeout_is_ignored() {
        let body = frames(Codec::MsgPack, &[PingRequest { message: "hi".into() }]);
        let request = Request::post("/test.v1.Greeter/Slow")
            .header(header::CONTENT_TYPE, "application/grpc")
            .header(GRPC_TIMEOUT, "soon")
            .body(Full::new(body))
            .unwrap();
        let response = handler()
            .with_request_timeout(Some(Duration::from_secs(1)))
            .handle(request)
            .await;
        // the configured bound still applies
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "4");
    }
}
