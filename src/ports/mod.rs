pub mod http_client;
pub mod module_store;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use module_store::{ModuleStore, StoreError, StoreResult};
