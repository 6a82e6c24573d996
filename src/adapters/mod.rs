pub mod forwarder;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod registrar;
pub mod stores;

/// Re-export commonly used types from adapters
pub use forwarder::{FallbackRoute, Forwarder, ForwarderPool};
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use middleware::*;
pub use registrar::ModuleRegistrar;
