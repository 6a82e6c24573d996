use async_trait::async_trait;
use thiserror::Error;

use crate::core::module::{ModuleDescriptor, ModuleRegistration, ModuleStatus};

/// Custom error type for module store operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, connection refused, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but the statement failed
    #[error("Store query failed: {0}")]
    Query(String),

    /// A persisted row could not be decoded into a module descriptor
    #[error("Corrupt module row '{name}': {message}")]
    Corrupt {
        /// Primary key of the offending row
        name: String,
        /// What could not be decoded
        message: String,
    },
}

/// Result type alias for module store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// ModuleStore defines the port (interface) to the persistent module table.
///
/// Every method is one logical unit of work against the store; callers never
/// hold a transaction across calls.
#[async_trait]
pub trait ModuleStore: Send + Sync + 'static {
    /// All rows whose status is `active`.
    async fn fetch_active(&self) -> StoreResult<Vec<ModuleDescriptor>>;

    /// Every row regardless of status, ordered by name.
    async fn fetch_all(&self) -> StoreResult<Vec<ModuleDescriptor>>;

    /// Insert the registration, or replace version/url/routes/manifest of the
    /// row with the same name. The stored row is always left `active` with a
    /// fresh `updated_at`.
    async fn upsert(&self, registration: ModuleRegistration) -> StoreResult<ModuleDescriptor>;

    /// Change the status of the named row, returning the updated row or
    /// `None` when no row has that name.
    async fn set_status(
        &self,
        name: &str,
        status: ModuleStatus,
    ) -> StoreResult<Option<ModuleDescriptor>>;
}
