//! # Switchyard Server
//!
//! HTTP server for the Switchyard gateway.
//!
//! One listener serves every protocol surface of a [`ServiceRegistry`]:
//!
//! - binary RPC over HTTP/2 (length-prefixed frames, `grpc-status` trailers)
//! - a JSON bridge under a configurable prefix
//! - runtime reflection
//! - a fallback (404 or static files) for everything else
//!
//! HTTP/1.1 and HTTP/2 prior-knowledge connections share the listener.
//! [`Supervisor`] owns the lifecycle: bind, serve, drain.
//!
//! ## Example
//!
//! ```rust,no_run
//! use switchyard_core::ServiceRegistry;
//! use switchyard_server::{Gateway, ServerConfig, ShutdownSignal, Supervisor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::builder().http_addr("127.0.0.1:8080").build();
//! let gateway = Gateway::builder(ServiceRegistry::new())
//!     .config(config.clone())
//!     .build()?;
//!
//! let server = Supervisor::new(gateway, config).bind().await?;
//! let report = server.serve(ShutdownSignal::with_os_signals()?).await?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! [`ServiceRegistry`]: switchyard_core::ServiceRegistry

#![doc(html_root_url = "https://docs.rs/switchyard-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod body;
mod config;
mod error;
mod fallback;
mod gateway;
pub mod grpc;
pub mod reflection;
mod router;
mod shutdown;
mod static_files;
mod supervisor;
mod transcoder;

pub use body::{HttpResponse, ResponseBody};
pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_API_PREFIX, DEFAULT_HTTP_ADDR, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use error::{ReflectionError, ServeError, ShutdownTimeout, StartupError};
pub use fallback::{FallbackFuture, FallbackHandler, NotFound};
pub use gateway::{Gateway, GatewayBuilder};
pub use grpc::{FrameError, GrpcHandler};
pub use reflection::{
    MethodDescription, ReflectionProvider, ReflectionRequest, ReflectionResponse,
    ServiceDescription,
};
pub use router::{RouteEntry, RouteTarget, Router, RouterBuilder};
pub use shutdown::{InFlightToken, InFlightTracker, ShutdownSignal};
pub use static_files::{StaticFileError, StaticFiles};
pub use supervisor::{BoundServer, DrainOutcome, Phase, ShutdownReport, Supervisor};
pub use transcoder::{TranscodeError, Transcoder};
