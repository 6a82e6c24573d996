pub mod dispatcher;
pub mod module;
pub mod rate_limiter;
pub mod registry;
pub mod snapshot;

pub use dispatcher::{Dispatcher, MatchPolicy, RouteMatch};
pub use module::{ModuleDescriptor, ModuleRegistration, ModuleStatus, RouteMethod, RouteRule};
pub use rate_limiter::ClientRateLimiter;
pub use registry::{ModuleRegistry, RegistryError};
pub use snapshot::RegistrySnapshot;
