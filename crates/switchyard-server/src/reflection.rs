//! Schema reflection.
//!
//! Answers "which services are here and what do they look like" from a
//! fixed list of service names chosen at startup. The provider only reads
//! descriptors; it never calls business handlers.
//!
//! Two transports reach the same queries:
//!
//! - the binary protocol at
//!   `/grpc.reflection.v1.ServerReflection/ServerReflectionInfo`, a
//!   bidirectional stream answering one response per request
//! - plain `POST` with `content-type: application/json`, one request and
//!   one response, for tooling without a binary client
//!
//! Queries are tagged JSON (or MessagePack) objects:
//!
//! ```json
//! {"query": "list_services"}
//! {"query": "describe_service", "name": "api.v1.APIService"}
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{header, HeaderValue, Method, Request, StatusCode};
use hyper::body::Body;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use switchyard_core::streaming;
use switchyard_core::{
    MethodKind, RegistryError, RequestContext, ServiceDefinition, ServiceRegistry, Status,
    Streaming,
};

use crate::body::{self, BoxError, HttpResponse};
use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::error::ReflectionError;

/// Fully qualified name of the reflection service.
pub const REFLECTION_SERVICE: &str = "grpc.reflection.v1.ServerReflection";

/// The single reflection method.
pub const REFLECTION_METHOD: &str = "ServerReflectionInfo";

/// A reflection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum ReflectionRequest {
    /// List every reflected service.
    ListServices,
    /// Describe one service.
    DescribeService {
        /// Fully qualified or unambiguous bare service name.
        name: String,
    },
}

/// Answer to a [`ReflectionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReflectionResponse {
    /// Reflected service names in startup order.
    ListServices {
        /// Fully qualified names.
        services: Vec<String>,
    },
    /// One service's methods.
    DescribeService(ServiceDescription),
}

/// Methods of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceDescription {
    /// Fully qualified service name.
    pub name: String,
    /// Methods in declaration order.
    pub methods: Vec<MethodDescription>,
}

/// One method as seen through reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MethodDescription {
    /// Method name.
    pub name: String,
    /// Binary protocol path.
    pub http_path: String,
    /// Request type name.
    pub request_type: String,
    /// Response type name.
    pub response_type: String,
    /// Request JSON Schema.
    pub request_schema: serde_json::Value,
    /// Response JSON Schema.
    pub response_schema: serde_json::Value,
    /// Call kind.
    pub kind: MethodKind,
}

/// Serves reflection queries for a fixed set of services.
#[derive(Debug, Clone)]
pub struct ReflectionProvider {
    registry: Arc<ServiceRegistry>,
    services: Vec<String>,
    max_body_size: usize,
}

impl ReflectionProvider {
    /// Creates a provider for `services`.
    ///
    /// # Errors
    ///
    /// [`ReflectionError::UnknownService`] if a name is not registered.
    pub fn new<I, S>(registry: Arc<ServiceRegistry>, services: I) -> Result<Self, ReflectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = Vec::new();
        for name in services {
            let name = name.as_ref();
            let contract = registry
                .service(name)
                .ok_or_else(|| ReflectionError::UnknownService(name.to_string()))?;
            let full = contract.name().to_string();
            if !names.contains(&full) {
                names.push(full);
            }
        }
        Ok(Self {
            registry,
            services: names,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        })
    }

    /// Sets the largest JSON query body accepted.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Returns the reflected service names.
    #[must_use]
    pub fn list_services(&self) -> &[String] {
        &self.services
    }

    /// Describes one reflected service.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the service is unknown or not in the reflected list.
    pub fn describe_service(&self, name: &str) -> Result<ServiceDescription, Status> {
        let contract = self
            .registry
            .service(name)
            .filter(|contract| self.services.iter().any(|s| s == contract.name().as_str()))
            .ok_or_else(|| {
                Status::not_found(RegistryError::ServiceNotFound(name.to_string()).to_string())
            })?;

        let methods = contract
            .methods()
            .map(|descriptor| MethodDescription {
                name: descriptor.method.clone(),
                http_path: descriptor.http_path.clone(),
                request_type: descriptor.request_shape.name.clone(),
                response_type: descriptor.response_shape.name.clone(),
                request_schema: descriptor.request_shape.schema.clone(),
                response_schema: descriptor.response_shape.schema.clone(),
                kind: descriptor.kind,
            })
            .collect();

        Ok(ServiceDescription {
            name: contract.name().to_string(),
            methods,
        })
    }

    /// Answers one query.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for an unknown service.
    pub fn answer(&self, request: &ReflectionRequest) -> Result<ReflectionResponse, Status> {
        match request {
            ReflectionRequest::ListServices => Ok(ReflectionResponse::ListServices {
                services: self.services.clone(),
            }),
            ReflectionRequest::DescribeService { name } => {
                self.describe_service(name).map(ReflectionResponse::DescribeService)
            }
        }
    }

    /// Builds the registry that serves reflection over the binary protocol.
    ///
    /// The stream answers requests in order and ends at the first unknown
    /// service.
    ///
    /// # Errors
    ///
    /// Propagates registration failures.
    pub fn into_registry(self) -> Result<ServiceRegistry, RegistryError> {
        let provider = Arc::new(self);
        let definition = ServiceDefinition::new(REFLECTION_SERVICE).bidi_streaming(
            REFLECTION_METHOD,
            move |_ctx: RequestContext, requests: Streaming<ReflectionRequest>| {
                let provider = Arc::clone(&provider);
                async move {
                    let responses = requests
                        .map(move |item| item.and_then(|request| provider.answer(&request)));
                    Ok(streaming::boxed(responses))
                }
            },
        );

        let mut registry = ServiceRegistry::new();
        registry.register(definition)?;
        Ok(registry)
    }

    /// Answers a plain JSON query: one request, one response.
    pub async fn handle_json<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if request.method() != Method::POST {
            let mut response = body::json_error(&Status::unimplemented(format!(
                "method {} not allowed, use POST",
                request.method()
            )));
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        let bytes = match body::collect_limited(request.into_body(), self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => return e.into_json_response(),
        };
        let query: ReflectionRequest = match serde_json::from_slice(&bytes) {
            Ok(query) => query,
            Err(e) => {
                return body::json_error(&Status::invalid_argument(format!(
                    "invalid reflection query: {e}"
                )))
            }
        };

        match self.answer(&query) {
            Ok(answer) => body::json(StatusCode::OK, &answer),
            Err(status) => body::json_error(&status),
        }
    }
}
