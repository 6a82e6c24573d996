//! modgate - a module registry and dynamic gateway router.
//!
//! Backend services ("modules") register themselves with a manifest listing
//! the path prefixes they serve. The gateway keeps an in-memory snapshot of the
//! active modules, refreshed from a persistent store, and reverse proxies each
//! request under the API prefix to the module whose route matches first.
//!
//! # Features
//! - Self-registration endpoint and `modgate register` client
//! - Install / uninstall (status toggle) without removing the stored row
//! - Lock-free routing reads from an atomically published snapshot
//! - Periodic, cancellable background refresh; a failed refresh keeps the last
//!   good routing table
//! - First-match dispatch (module name, then declaration order) or longest-prefix
//! - Configured fallback routes for services that do not self-register
//! - Per-client-IP rate limiting, request IDs, security headers, CORS
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping registry and dispatch logic inside `core`:
//! - [`ports::ModuleStore`] is implemented by PostgreSQL and in-memory stores
//! - [`ports::HttpClient`] is implemented by a hyper/rustls client
//! - [`adapters::HttpHandler`] exposes everything as an axum `Router`
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use modgate::{
//!     adapters::{HttpClientAdapter, HttpHandler, stores::InMemoryModuleStore},
//!     config::GatewayConfig,
//!     core::registry::ModuleRegistry,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::default();
//! let registry = Arc::new(ModuleRegistry::new(Arc::new(InMemoryModuleStore::new())));
//! let _refresh = registry.init(Duration::from_secs(30), CancellationToken::new()).await;
//!
//! let client = Arc::new(HttpClientAdapter::new(Duration::from_secs(30))?);
//! let app = Arc::new(HttpHandler::from_config(&config, registry, client)?).router();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(
//!     listener,
//!     app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//! )
//! .await?;
//! # Ok(()) }
//! ```
pub mod config;
pub mod error;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{Dispatcher, ModuleRegistry},
    error::GatewayError,
    ports::{http_client::HttpClient, module_store::ModuleStore},
    utils::GracefulShutdown,
};
