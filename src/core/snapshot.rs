//! Immutable, versioned view of the active modules.
//!
//! A snapshot is built from scratch on every registry refresh and then
//! published wholesale, so readers holding one never see a mix of two refreshes.
use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::core::module::ModuleDescriptor;

/// Active modules keyed (and therefore iterated) by name ascending.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    version: u64,
    refreshed_at: Option<DateTime<Utc>>,
    modules: BTreeMap<String, Arc<ModuleDescriptor>>,
}

impl RegistrySnapshot {
    /// The empty snapshot published before the first successful refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from store rows. Inactive rows are dropped, so a store
    /// adapter that returns extra rows cannot leak them into dispatch.
    pub fn build(version: u64, rows: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        let modules = rows
            .into_iter()
            .filter(ModuleDescriptor::is_active)
            .map(|module| (module.name.clone(), Arc::new(module)))
            .collect();

        Self {
            version,
            refreshed_at: Some(Utc::now()),
            modules,
        }
    }

    /// Monotonic publication counter; 0 means "never refreshed".
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModuleDescriptor>> {
        self.modules.get(name)
    }

    /// Modules in dispatch order (name ascending).
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleDescriptor>> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::module::{ModuleStatus, RouteRule};

    fn descriptor(name: &str, status: ModuleStatus) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            url: format!("http://{name}:4000"),
            routes: vec![RouteRule::any(format!("/{name}"))],
            manifest: json!({ "name": name }),
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = RegistrySnapshot::empty();
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.is_empty());
        assert!(snapshot.refreshed_at().is_none());
    }

    #[test]
    fn test_build_skips_inactive_rows() {
        let snapshot = RegistrySnapshot::build(
            3,
            vec![
                descriptor("fees", ModuleStatus::Active),
                descriptor("exam", ModuleStatus::Inactive),
            ],
        );
        assert_eq!(snapshot.version(), 3);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("fees").is_some());
        assert!(snapshot.get("exam").is_none());
    }

    #[test]
    fn test_modules_iterate_by_name() {
        let snapshot = RegistrySnapshot::build(
            1,
            vec![
                descriptor("transport", ModuleStatus::Active),
                descriptor("attendance", ModuleStatus::Active),
                descriptor("fees", ModuleStatus::Active),
            ],
        );
        let names: Vec<_> = snapshot.modules().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["attendance", "fees", "transport"]);
    }
}
