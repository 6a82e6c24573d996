//! Module store adapters.
pub mod memory;
pub mod postgres;

pub use memory::InMemoryModuleStore;
pub use postgres::PostgresModuleStore;
