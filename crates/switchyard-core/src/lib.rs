//! # Switchyard Core
//!
//! Core types for the Switchyard gateway.
//!
//! Business logic is written once against a typed service contract; the
//! gateway exposes it over every protocol surface. This crate owns the parts
//! that do not know about HTTP:
//!
//! - [`ServiceRegistry`] / [`ServiceDefinition`] - service registration and lookup
//! - [`MethodDescriptor`] / [`MessageShape`] - immutable method contracts
//! - [`RequestContext`] - per-call context with deadline and cancellation
//! - [`Status`] / [`Code`] - the RPC status vocabulary
//! - [`Codec`] - MessagePack and JSON payload codecs
//! - [`Streaming`] - typed message streams for streaming calls

#![doc(html_root_url = "https://docs.rs/switchyard-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod codec;
mod context;
pub mod contract;
mod error;
pub mod registry;
mod status;
pub mod streaming;

pub use codec::{Codec, CodecError};
pub use context::{RequestContext, RequestId};
pub use contract::{MessageShape, MethodDescriptor, MethodKind, ServiceName};
pub use error::{InvokeError, RegistryError};
pub use registry::{
    ErasedHandler, MethodHandle, RawRequest, RawResponse, ServiceContract, ServiceDefinition,
    ServiceRegistry,
};
pub use status::{Code, Status};
pub use streaming::{RawMessages, Streaming};
