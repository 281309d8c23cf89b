//! # Switchyard
//!
//! A multi-protocol RPC gateway. Services are written once against a typed
//! contract and served, on a single port, as:
//!
//! - binary RPC (HTTP/2, length-prefixed MessagePack or JSON frames)
//! - HTTP+JSON under `/api/v1`
//! - runtime reflection
//! - a static frontend or JSON 404 for everything else
//!
//! This crate wires configuration, logging and the bundled
//! `api.v1.APIService` into [`switchyard_server`]. The library half exists so
//! the wiring can be tested without spawning the binary.

#![doc(html_root_url = "https://docs.rs/switchyard/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod service;

pub use config::{AppConfig, ConfigError};
pub use error::AppError;

use switchyard_core::ServiceRegistry;
use switchyard_server::{
    BoundServer, Gateway, ShutdownReport, ShutdownSignal, StartupError, StaticFiles, Supervisor,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the registry with every bundled service.
pub fn registry() -> Result<ServiceRegistry, StartupError> {
    let mut registry = ServiceRegistry::new();
    registry.register(service::api_service())?;
    Ok(registry)
}

/// Builds the gateway described by `config`.
pub fn gateway(config: &AppConfig) -> Result<Gateway, StartupError> {
    let registry = registry()?;
    let reflected: Vec<String> = registry
        .services()
        .map(|service| service.name().to_string())
        .collect();

    let mut builder = Gateway::builder(registry).config(config.server_config());
    if config.reflection {
        builder = builder.reflection(reflected);
    }
    if let Some(dir) = &config.static_dir {
        tracing::info!(root = %dir.display(), "Serving static files");
        builder = builder.fallback(StaticFiles::new(dir).spa_fallback(true));
    }
    builder.build()
}

/// Builds the gateway and binds its listener.
pub async fn bind(config: &AppConfig) -> Result<BoundServer, StartupError> {
    let gateway = gateway(config)?;
    Supervisor::new(gateway, config.server_config()).bind().await
}

/// Binds, serves until `shutdown` fires, and drains.
pub async fn run(config: &AppConfig, shutdown: ShutdownSignal) -> Result<ShutdownReport, AppError> {
    let server = bind(config).await?;
    let report = server.serve(shutdown).await?;
    Ok(report)
}
