//! Service registration and handler dispatch.
//!
//! Business logic is written once as typed async functions and registered
//! against a [`ServiceDefinition`]. Registration erases each handler into a
//! single invocation form, [`ErasedHandler`], which every protocol surface
//! calls through [`MethodHandle::invoke`]. Decoding, deadline enforcement,
//! and panic recovery therefore behave the same on every surface.
//!
//! # Handler kinds
//!
//! | Kind | Signature |
//! |---|---|
//! | unary | `Fn(RequestContext, Req) -> Future<Result<Res, Status>>` |
//! | server streaming | `Fn(RequestContext, Req) -> Future<Result<Streaming<Res>, Status>>` |
//! | client streaming | `Fn(RequestContext, Streaming<Req>) -> Future<Result<Res, Status>>` |
//! | bidi streaming | `Fn(RequestContext, Streaming<Req>) -> Future<Result<Streaming<Res>, Status>>` |
//!
//! # Example
//!
//! ```
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//! use switchyard_core::{RequestContext, ServiceDefinition, ServiceRegistry, Status};
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct PingRequest { message: String }
//!
//! #[derive(Serialize, JsonSchema)]
//! struct PingResponse { message: String }
//!
//! async fn ping(_ctx: RequestContext, req: PingRequest) -> Result<PingResponse, Status> {
//!     Ok(PingResponse { message: format!("Pong: {}", req.message) })
//! }
//!
//! let mut registry = ServiceRegistry::new();
//! registry
//!     .register(ServiceDefinition::new("pkg.Greeter").unary("Ping", ping))
//!     .unwrap();
//!
//! assert!(registry.lookup("pkg.Greeter", "Ping").is_ok());
//! assert!(registry.lookup("Greeter", "Ping").is_ok());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{stream, FutureExt, StreamExt};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;

use crate::codec::Codec;
use crate::context::RequestContext;
use crate::contract::{MessageShape, MethodDescriptor, MethodKind, ServiceName};
use crate::error::{InvokeError, RegistryError};
use crate::status::Status;
use crate::streaming::{self, RawMessages, Streaming};

/// Request payload handed to an erased handler.
pub enum RawRequest {
    /// Exactly one encoded message.
    Single(Bytes),
    /// A stream of encoded messages.
    Stream(RawMessages),
}

impl RawRequest {
    /// Returns the single message, or a protocol error for a stream.
    pub fn into_single(self) -> Result<Bytes, InvokeError> {
        match self {
            Self::Single(payload) => Ok(payload),
            Self::Stream(_) => Err(InvokeError::Protocol(
                "expected exactly one request message".to_string(),
            )),
        }
    }

    /// Returns the messages as a stream. A single message becomes a stream of one.
    pub fn into_stream(self) -> RawMessages {
        match self {
            Self::Single(payload) => streaming::iter([payload]),
            Self::Stream(messages) => messages,
        }
    }
}

impl std::fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(payload) => f.debug_tuple("Single").field(payload).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Response payload produced by an erased handler.
pub enum RawResponse {
    /// Exactly one encoded message.
    Single(Bytes),
    /// A stream of encoded messages.
    Stream(RawMessages),
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(payload) => f.debug_tuple("Single").field(payload).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Type alias for a boxed handler invocation.
pub type BoxedInvocation = Pin<Box<dyn Future<Output = Result<RawResponse, InvokeError>> + Send>>;

/// A type-erased handler.
pub type ErasedHandler =
    Arc<dyn Fn(RequestContext, Codec, RawRequest) -> BoxedInvocation + Send + Sync>;

struct MethodEntry {
    method: String,
    kind: MethodKind,
    request_shape: MessageShape,
    response_shape: MessageShape,
    handler: ErasedHandler,
}

/// A service under construction: a name plus its typed methods.
///
/// Handed to [`ServiceRegistry::register`], which validates it.
pub struct ServiceDefinition {
    name: String,
    methods: Vec<MethodEntry>,
}

impl ServiceDefinition {
    /// Starts a definition for the fully qualified service `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Returns the service name as given.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a unary method.
    pub fn unary<Req, Res, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + JsonSchema + Send + 'static,
        Res: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(
            move |ctx: RequestContext, codec: Codec, request: RawRequest| -> BoxedInvocation {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let payload = request.into_single()?;
                    let request: Req = codec.decode(&payload).map_err(InvokeError::Decode)?;

                    let response = handler(ctx, request).await?;

                    let bytes = codec.encode(&response).map_err(InvokeError::Encode)?;
                    Ok(RawResponse::Single(bytes))
                })
            },
        );
        self.push::<Req, Res>(method, MethodKind::Unary, erased)
    }

    /// Adds a server-streaming method.
    pub fn server_streaming<Req, Res, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + JsonSchema + Send + 'static,
        Res: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Streaming<Res>, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(
            move |ctx: RequestContext, codec: Codec, request: RawRequest| -> BoxedInvocation {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let payload = request.into_single()?;
                    let request: Req = codec.decode(&payload).map_err(InvokeError::Decode)?;

                    let responses = handler(ctx, request).await?;

                    Ok(RawResponse::Stream(streaming::encode(responses, codec)))
                })
            },
        );
        self.push::<Req, Res>(method, MethodKind::ServerStreaming, erased)
    }

    /// Adds a client-streaming method.
    pub fn client_streaming<Req, Res, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + JsonSchema + Send + 'static,
        Res: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(
            move |ctx: RequestContext, codec: Codec, request: RawRequest| -> BoxedInvocation {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let requests = streaming::decode::<Req>(request.into_stream(), codec);

                    let response = handler(ctx, requests).await?;

                    let bytes = codec.encode(&response).map_err(InvokeError::Encode)?;
                    Ok(RawResponse::Single(bytes))
                })
            },
        );
        self.push::<Req, Res>(method, MethodKind::ClientStreaming, erased)
    }

    /// Adds a bidirectional-streaming method.
    pub fn bidi_streaming<Req, Res, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + JsonSchema + Send + 'static,
        Res: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Streaming<Res>, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(
            move |ctx: RequestContext, codec: Codec, request: RawRequest| -> BoxedInvocation {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let requests = streaming::decode::<Req>(request.into_stream(), codec);

                    let responses = handler(ctx, requests).await?;

                    Ok(RawResponse::Stream(streaming::encode(responses, codec)))
                })
            },
        );
        self.push::<Req, Res>(method, MethodKind::BidiStreaming, erased)
    }

    fn push<Req: JsonSchema, Res: JsonSchema>(
        mut self,
        method: impl Into<String>,
        kind: MethodKind,
        handler: ErasedHandler,
    ) -> Self {
        self.methods.push(MethodEntry {
            method: method.into(),
            kind,
            request_shape: MessageShape::of::<Req>(),
            response_shape: MessageShape::of::<Res>(),
            handler,
        });
        self
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field(
                "methods",
                &self.methods.iter().map(|m| m.method.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A registered method: its descriptor plus the erased handler.
#[derive(Clone)]
pub struct MethodHandle {
    descriptor: Arc<MethodDescriptor>,
    handler: ErasedHandler,
}

impl MethodHandle {
    /// Returns the method descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Returns the erased handler.
    #[must_use]
    pub fn handler(&self) -> &ErasedHandler {
        &self.handler
    }

    /// Invokes the handler.
    ///
    /// The context deadline bounds the call and, for streamed responses,
    /// every subsequent message. A panic inside the handler is caught and
    /// returned as `Internal`; sibling calls are unaffected.
    pub async fn invoke(
        &self,
        ctx: RequestContext,
        codec: Codec,
        request: RawRequest,
    ) -> Result<RawResponse, InvokeError> {
        let deadline = ctx.deadline();
        let call = AssertUnwindSafe((self.handler)(ctx, codec, request)).catch_unwind();

        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(Status::deadline_exceeded("deadline exceeded").into()),
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(RawResponse::Stream(messages))) => {
                let messages = self.guard_stream(messages);
                let messages = match deadline {
                    Some(deadline) => with_deadline(messages, deadline),
                    None => messages,
                };
                Ok(RawResponse::Stream(messages))
            }
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    method = %self.descriptor.http_path,
                    "Handler panicked"
                );
                Err(Status::internal("handler panicked").into())
            }
        }
    }

    fn guard_stream(&self, messages: RawMessages) -> RawMessages {
        let path = self.descriptor.http_path.clone();
        stop_after_error(AssertUnwindSafe(messages).catch_unwind().map(
            move |item| match item {
                Ok(item) => item,
                Err(_) => {
                    tracing::error!(method = %path, "Handler panicked while streaming");
                    Err(Status::internal("handler panicked"))
                }
            },
        ))
    }
}

impl std::fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ends a stream after its first error item.
fn stop_after_error<S>(messages: S) -> RawMessages
where
    S: futures_util::Stream<Item = Result<Bytes, Status>> + Send + 'static,
{
    Box::pin(stream::unfold(Some(Box::pin(messages)), |state| async move {
        let mut inner = state?;
        match inner.next().await? {
            Ok(payload) => Some((Ok(payload), Some(inner))),
            Err(status) => Some((Err(status), None)),
        }
    }))
}

fn with_deadline(messages: RawMessages, deadline: Instant) -> RawMessages {
    Box::pin(stream::unfold(Some(messages), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout_at(deadline, inner.next()).await {
            Ok(Some(item)) => Some((item, Some(inner))),
            Ok(None) => None,
            Err(_) => Some((Err(Status::deadline_exceeded("deadline exceeded")), None)),
        }
    }))
}

/// A registered service: its name and methods in declaration order.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    name: ServiceName,
    methods: IndexMap<String, MethodHandle>,
}

impl ServiceContract {
    /// Returns the service name.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Returns the method descriptors in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(MethodHandle::descriptor)
    }

    /// Returns the method with the given name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodHandle> {
        self.methods.get(name)
    }
}

#[derive(Debug, Clone)]
enum ShortName {
    Unique(String),
    Ambiguous,
}

/// Registry of services and their handlers.
///
/// Built mutably at startup, then frozen by moving it behind an `Arc`;
/// after that every read is lock free.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, ServiceContract>,
    short_names: HashMap<String, ShortName>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidServiceName`] if the name is not `package.Service`
    /// - [`RegistryError::DuplicateService`] if the name is already registered
    /// - [`RegistryError::DuplicateMethod`] if the definition repeats a method
    pub fn register(&mut self, definition: ServiceDefinition) -> Result<(), RegistryError> {
        let name = ServiceName::parse(definition.name)?;
        if self.services.contains_key(name.as_str()) {
            return Err(RegistryError::DuplicateService(name.to_string()));
        }

        let mut methods = IndexMap::with_capacity(definition.methods.len());
        for entry in definition.methods {
            if methods.contains_key(&entry.method) {
                return Err(RegistryError::DuplicateMethod {
                    service: name.to_string(),
                    method: entry.method,
                });
            }
            let descriptor = MethodDescriptor::new(
                &name,
                entry.method.clone(),
                entry.kind,
                entry.request_shape,
                entry.response_shape,
            );
            methods.insert(
                entry.method,
                MethodHandle {
                    descriptor: Arc::new(descriptor),
                    handler: entry.handler,
                },
            );
        }

        self.short_names
            .entry(name.short_name().to_string())
            .and_modify(|existing| *existing = ShortName::Ambiguous)
            .or_insert_with(|| ShortName::Unique(name.to_string()));

        tracing::debug!(service = %name, methods = methods.len(), "Registered service");
        self.services
            .insert(name.to_string(), ServiceContract { name, methods });
        Ok(())
    }

    /// Resolves a fully qualified or unambiguous bare service name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceContract> {
        if let Some(contract) = self.services.get(name) {
            return Some(contract);
        }
        match self.short_names.get(name)? {
            ShortName::Unique(full) => self.services.get(full),
            ShortName::Ambiguous => None,
        }
    }

    /// Looks up a method.
    ///
    /// `service` may be the fully qualified name or, when unambiguous, the
    /// bare service name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ServiceNotFound`] or [`RegistryError::MethodNotFound`].
    pub fn lookup(&self, service: &str, method: &str) -> Result<&MethodHandle, RegistryError> {
        let contract = self
            .service(service)
            .ok_or_else(|| RegistryError::ServiceNotFound(service.to_string()))?;

        contract
            .method(method)
            .ok_or_else(|| RegistryError::MethodNotFound {
                service: contract.name.to_string(),
                method: method.to_string(),
            })
    }

    /// Returns all registered services in registration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceContract> {
        self.services.values()
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
