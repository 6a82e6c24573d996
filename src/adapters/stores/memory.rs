use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    core::module::{ModuleDescriptor, ModuleRegistration, ModuleStatus},
    ports::module_store::{ModuleStore, StoreResult},
};

/// Process-local module table.
///
/// Used by `store.kind = "memory"` for single-node development setups and by
/// the test suite. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryModuleStore {
    rows: RwLock<BTreeMap<String, ModuleDescriptor>>,
}

impl InMemoryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table with existing rows, e.g. modules that were registered
    /// before a restart and kept their status.
    pub fn with_rows(rows: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().map(|m| (m.name.clone(), m)).collect()),
        }
    }
}

#[async_trait]
impl ModuleStore for InMemoryModuleStore {
    async fn fetch_active(&self) -> StoreResult<Vec<ModuleDescriptor>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|m| m.is_active()).cloned().collect())
    }

    async fn fetch_all(&self) -> StoreResult<Vec<ModuleDescriptor>> {
        let rows = self.rows.read().await;
        Ok(rows.values().cloned().collect())
    }

    async fn upsert(&self, registration: ModuleRegistration) -> StoreResult<ModuleDescriptor> {
        let row = ModuleDescriptor {
            name: registration.name,
            version: registration.version,
            url: registration.url,
            routes: registration.routes,
            manifest: registration.manifest,
            status: ModuleStatus::Active,
            updated_at: Utc::now(),
        };

        self.rows
            .write()
            .await
            .insert(row.name.clone(), row.clone());
        Ok(row)
    }

    async fn set_status(
        &self,
        name: &str,
        status: ModuleStatus,
    ) -> StoreResult<Option<ModuleDescriptor>> {
        let mut rows = self.rows.write().await;
        Ok(rows.get_mut(name).map(|row| {
            row.status = status;
            row.updated_at = Utc::now();
            row.clone()
        }))
    }
}
