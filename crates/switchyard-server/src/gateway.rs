//! The gateway: one routing table in front of every protocol surface.
//!
//! [`GatewayBuilder`] wires the binary handler, reflection, the JSON bridge
//! and the fallback against a single [`ServiceRegistry`], then freezes the
//! result. Routes registered:
//!
//! | Prefix | Surface |
//! |---|---|
//! | `/<package>.<Service>` (per service) | binary RPC |
//! | `/grpc.reflection.v1.ServerReflection` | reflection |
//! | API prefix (default `/api/v1`) | JSON bridge |
//! | `/` | fallback |
//!
//! Every request runs inside a `request` span, is logged with its status and
//! latency, and is isolated from panics in the surface that serves it.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use http::{header, Request};
use hyper::body::Body;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use switchyard_core::{ServiceRegistry, Status};

use crate::body::{self, BoxError, HttpResponse};
use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::fallback::{FallbackHandler, NotFound};
use crate::grpc::GrpcHandler;
use crate::reflection::{ReflectionProvider, REFLECTION_SERVICE};
use crate::router::{RouteTarget, Router};
use crate::transcoder::Transcoder;

struct Reflection {
    provider: ReflectionProvider,
    grpc: GrpcHandler,
}

/// Frozen dispatch state shared by every connection.
pub struct Gateway {
    router: Router,
    grpc: GrpcHandler,
    reflection: Option<Reflection>,
    transcoder: Transcoder,
    fallback: Arc<dyn FallbackHandler>,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Creates a builder over `registry`.
    #[must_use]
    pub fn builder(registry: ServiceRegistry) -> GatewayBuilder {
        GatewayBuilder::new(registry)
    }

    /// Returns the routing table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the token every request's cancellation token descends from.
    ///
    /// Cancelling it cancels every in-flight request.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Routes and serves one request.
    pub async fn handle<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + fmt::Display + Send,
    {
        let started = Instant::now();
        let target = self.router.resolve(request.uri().path());
        let span = tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            surface = %target,
        );

        async move {
            let response = match AssertUnwindSafe(self.dispatch(target, request))
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(_) => {
                    tracing::error!("Request handler panicked");
                    body::json_error(&Status::internal("internal server error"))
                }
            };

            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Request completed"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch<B>(&self, target: RouteTarget, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + fmt::Display + Send,
    {
        match target {
            RouteTarget::BinaryRpc => self.grpc.handle(request).await,
            RouteTarget::Reflection => match &self.reflection {
                Some(reflection) if is_grpc(&request) => reflection.grpc.handle(request).await,
                Some(reflection) => reflection.provider.handle_json(request).await,
                None => self.fallback(request).await,
            },
            RouteTarget::Transcoder => self.transcoder.handle(request).await,
            RouteTarget::Fallback => self.fallback(request).await,
        }
    }

    async fn fallback<B>(&self, request: Request<B>) -> HttpResponse {
        let (parts, _) = request.into_parts();
        self.fallback.call(&parts).await
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("router", &self.router)
            .field("reflection", &self.reflection.is_some())
            .field("api_prefix", &self.transcoder.prefix())
            .finish_non_exhaustive()
    }
}

fn is_grpc<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/grpc"))
}

/// Builder for [`Gateway`].
///
/// # Example
///
/// ```rust
/// use switchyard_core::ServiceRegistry;
/// use switchyard_server::{Gateway, RouteTarget, ServerConfig};
///
/// let gateway = Gateway::builder(ServiceRegistry::new())
///     .config(ServerConfig::builder().api_prefix("/rpc").build())
///     .build()
///     .unwrap();
///
/// assert_eq!(gateway.router().resolve("/rpc/Greeter/Ping"), RouteTarget::Transcoder);
/// ```
pub struct GatewayBuilder {
    registry: ServiceRegistry,
    config: ServerConfig,
    reflection: Option<Vec<String>>,
    fallback: Arc<dyn FallbackHandler>,
}

impl GatewayBuilder {
    /// Creates a builder with default configuration, no reflection, and a
    /// JSON 404 fallback.
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            config: ServerConfig::default(),
            reflection: None,
            fallback: Arc::new(NotFound),
        }
    }

    /// Sets the server configuration (API prefix, request timeout).
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables reflection for the listed services.
    #[must_use]
    pub fn reflection<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reflection = Some(services.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the handler for unmatched paths.
    #[must_use]
    pub fn fallback(mut self, fallback: impl FallbackHandler) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Freezes the registry and builds the routing table.
    ///
    /// # Errors
    ///
    /// [`StartupError::Reflection`] if a reflected service is not registered.
    pub fn build(self) -> Result<Gateway, StartupError> {
        let registry = Arc::new(self.registry);
        let shutdown = CancellationToken::new();
        let timeout = self.config.request_timeout();

        let grpc = GrpcHandler::new(Arc::clone(&registry))
            .with_request_timeout(timeout)
            .with_shutdown_token(shutdown.clone());
        let transcoder = Transcoder::new(Arc::clone(&registry), self.config.api_prefix())
            .with_request_timeout(timeout)
            .with_max_body_size(self.config.max_body_size())
            .with_shutdown_token(shutdown.clone());

        let reflection = match self.reflection {
            Some(services) => {
                let provider = ReflectionProvider::new(Arc::clone(&registry), services)?
                    .with_max_body_size(self.config.max_body_size());
                let reflection_registry = provider.clone().into_registry()?;
                let grpc = GrpcHandler::new(Arc::new(reflection_registry))
                    .with_request_timeout(timeout)
                    .with_shutdown_token(shutdown.clone());
                Some(Reflection { provider, grpc })
            }
            None => None,
        };

        let mut routes = Router::builder();
        for service in registry.services() {
            routes = routes.route(format!("/{}", service.name()), RouteTarget::BinaryRpc);
        }
        if reflection.is_some() {
            routes = routes.route(format!("/{REFLECTION_SERVICE}"), RouteTarget::Reflection);
        }
        let router = routes
            .route(transcoder.prefix(), RouteTarget::Transcoder)
            .route("/", RouteTarget::Fallback)
            .build();

        for entry in router.entries() {
            tracing::debug!(prefix = entry.prefix(), surface = %entry.target(), "Route");
        }

        Ok(Gateway {
            router,
            grpc,
            reflection,
            transcoder,
            fallback: self.fallback,
            shutdown,
        })
    }
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("reflection", &self.reflection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackFuture;
    use crate::grpc::{encode_frame, GRPC_STATUS};
    use http::request::Parts;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use switchyard_core::{Codec, ServiceDefinition};

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct PingRequest {
        message: String,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct PingResponse {
        message: String,
    }

    struct Teapot;

    impl FallbackHandler for Teapot {
        fn call(&self, _request: &Parts) -> FallbackFuture {
            Box::pin(async {
                let mut response = body::json_error(&Status::not_found("teapot"));
                *response.status_mut() = StatusCode::IM_A_TEAPOT;
                response
            })
        }
    }

    fn registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDefinition::new("api.v1.Greeter").unary(
                "Ping",
                |_ctx, req: PingRequest| async move {
                    Ok(PingResponse {
                        message: format!("Pong: {}", req.message),
                    })
                },
            ))
            .unwrap();
        registry
    }

    fn gateway() -> Gateway {
        Gateway::builder(registry())
            .reflection(["api.v1.Greeter"])
            .fallback(Teapot)
            .build()
            .unwrap()
    }

    fn request(method: &str, path: &str, content_type: &str, body: Bytes) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(body))
            .unwrap()
    }

    #[test]
    fn test_routes() {
        let gateway = gateway();
        let prefixes: Vec<_> = gateway
            .router()
            .entries()
            .iter()
            .map(|e| (e.prefix().to_string(), e.target()))
            .collect();
        assert_eq!(
            prefixes,
            vec![
                ("/api.v1.Greeter".to_string(), RouteTarget::BinaryRpc),
                (
                    "/grpc.reflection.v1.ServerReflection".to_string(),
                    RouteTarget::Reflection
                ),
                ("/api/v1".to_string(), RouteTarget::Transcoder),
                ("/".to_string(), RouteTarget::Fallback),
            ]
        );
    }

    #[test]
    fn test_reflection_of_unknown_service_fails() {
        let err = Gateway::builder(registry())
            .reflection(["api.v1.Missing"])
            .build()
            .unwrap_err();
        assert!(matches!(err, StartupError::Reflection(_)));
    }

    #[tokio::test]
    async fn test_dispatch_to_each_surface() {
        let gateway = gateway();

        let body = encode_frame(&Codec::MsgPack.encode(&PingRequest { message: "hi".into() }).unwrap());
        let response = gateway
            .handle(request("POST", "/api.v1.Greeter/Ping", "application/grpc", body))
            .await;
        let collected = response.into_body().collect().await.unwrap();
        assert_eq!(collected.trailers().unwrap().get(GRPC_STATUS).unwrap(), "0");

        let response = gateway
            .handle(request(
                "POST",
                "/api/v1/Greeter/Ping",
                "application/json",
                Bytes::from_static(br#"{"message":"hi"}"#),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], br#"{"message":"Pong: hi"}"#);

        let response = gateway
            .handle(request(
                "POST",
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
                "application/json",
                Bytes::from_static(br#"{"query":"list_services"}"#),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = gateway
            .handle(request("GET", "/index.html", "text/html", Bytes::new()))
            .await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_reflection_disabled_falls_back() {
        let gateway = Gateway::builder(registry()).build().unwrap();
        let response = gateway
            .handle(request(
                "POST",
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
                "application/json",
                Bytes::from_static(br#"{"query":"list_services"}"#),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
