//! Module registry: decides which modules may currently receive traffic.
//!
//! The registry owns the store handle and a published [`RegistrySnapshot`]
//! behind an `ArcSwap`. Reads (`get_module`, `list_active`, `snapshot`) are
//! lock-free loads of the current snapshot. Refreshes rebuild a snapshot from
//! the store and swap it in; they are serialized by an async mutex so two
//! refreshes never race to publish out of order.
//!
//! Refresh failures never blank the routing table: the previous snapshot stays
//! published and the error is only logged (and returned to direct callers).
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    core::{
        module::{ModuleDescriptor, ModuleError, ModuleRegistration, ModuleStatus},
        snapshot::RegistrySnapshot,
    },
    ports::module_store::{ModuleStore, StoreError},
    tracing_setup::create_refresh_span,
};

/// Default period between background refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Errors surfaced by registry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    /// Caller supplied an invalid manifest, URL or status
    #[error("Invalid request: {0}")]
    Validation(#[from] ModuleError),

    /// No module row has the given name
    #[error("Module {0} not found")]
    NotFound(String),

    /// The persistent store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ModuleRegistry {
    store: Arc<dyn ModuleStore>,
    snapshot: ArcSwap<RegistrySnapshot>,
    refresh_lock: Mutex<()>,
}

impl ModuleRegistry {
    /// Create a registry with an empty snapshot. Call [`ModuleRegistry::init`]
    /// (or [`ModuleRegistry::refresh`]) before serving traffic.
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Run one refresh, then spawn the periodic refresh task.
    ///
    /// A failing initial refresh is logged and the gateway starts with an
    /// empty routing table. The returned task ends when `shutdown` is cancelled.
    pub async fn init(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        match self.refresh().await {
            Ok(snapshot) => tracing::info!(
                "Module registry initialized with {} active modules",
                snapshot.len()
            ),
            Err(e) => tracing::error!(
                "Initial module registry refresh failed, starting with an empty routing table: {}",
                e
            ),
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.run_periodic_refresh(period, shutdown).await })
    }

    /// Refresh every `period` until `shutdown` is cancelled. A tick that finds
    /// another refresh in flight is skipped rather than queued.
    pub async fn run_periodic_refresh(&self, period: Duration, shutdown: CancellationToken) {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Module registry refresh task started. Interval: {}",
            humantime::format_duration(period)
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let refresh = self.try_refresh().instrument(create_refresh_span("timer"));
                    if refresh.await.is_none() {
                        tracing::debug!("Skipping scheduled refresh: another refresh is in flight");
                    }
                }
            }
        }

        tracing::info!("Module registry refresh task stopped");
    }

    /// Rebuild the snapshot from the store and publish it, waiting for any
    /// in-flight refresh to finish first.
    ///
    /// On store failure the previously published snapshot is retained.
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Like [`ModuleRegistry::refresh`] but returns `None` immediately when a
    /// refresh is already running.
    pub async fn try_refresh(&self) -> Option<Result<Arc<RegistrySnapshot>, RegistryError>> {
        let _guard = self.refresh_lock.try_lock().ok()?;
        Some(self.refresh_locked().await)
    }

    async fn refresh_locked(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let previous = self.snapshot.load_full();

        match self.store.fetch_active().await {
            Ok(rows) => {
                let next = Arc::new(RegistrySnapshot::build(previous.version() + 1, rows));
                self.snapshot.store(Arc::clone(&next));
                let span = tracing::Span::current();
                span.record("snapshot_version", next.version());
                span.record("modules", next.len());
                tracing::info!(
                    "Refreshed module registry: {} active modules (version {})",
                    next.len(),
                    next.version()
                );
                Ok(next)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to refresh module registry, keeping version {} with {} active modules: {}",
                    previous.version(),
                    previous.len(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Validate and upsert a module manifest, then refresh so the caller
    /// observes the new routes immediately.
    ///
    /// Only validation and the upsert itself can fail the call; a refresh
    /// failure afterwards is logged and the module shows up on the next cycle.
    pub async fn register_module(
        &self,
        manifest: serde_json::Value,
        url: &str,
    ) -> Result<ModuleDescriptor, RegistryError> {
        let registration = ModuleRegistration::from_manifest(manifest, url)?;
        let name = registration.name.clone();

        let row = self.store.upsert(registration).await.map_err(|e| {
            tracing::error!("Failed to register module {}: {}", name, e);
            e
        })?;

        tracing::info!(
            "Registered module {} ({}) at {} with {} routes",
            row.name,
            row.version,
            row.url,
            row.routes.len()
        );

        if let Err(e) = self
            .refresh()
            .instrument(create_refresh_span("register"))
            .await
        {
            tracing::warn!(
                "Module {} was stored but the registry refresh failed; it will be routed after the next successful refresh: {}",
                row.name,
                e
            );
        }

        Ok(row)
    }

    /// Parse `status` and apply it with [`ModuleRegistry::set_status`].
    pub async fn toggle_status(
        &self,
        name: &str,
        status: &str,
    ) -> Result<ModuleDescriptor, RegistryError> {
        let status: ModuleStatus = status.parse()?;
        self.set_status(name, status).await
    }

    /// Update a module's status and refresh synchronously, so that once this
    /// returns `list_active` reflects the change.
    pub async fn set_status(
        &self,
        name: &str,
        status: ModuleStatus,
    ) -> Result<ModuleDescriptor, RegistryError> {
        let row = self
            .store
            .set_status(name, status)
            .await
            .map_err(|e| {
                tracing::error!("Failed to set module {} to {}: {}", name, status, e);
                e
            })?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        tracing::info!("Module {} is now {}", row.name, row.status);

        if let Err(e) = self
            .refresh()
            .instrument(create_refresh_span("status_change"))
            .await
        {
            tracing::warn!(
                "Module {} status was stored but the registry refresh failed: {}",
                row.name,
                e
            );
        }

        Ok(row)
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.snapshot.load().get(name).cloned()
    }

    /// Active modules from the current snapshot, name ascending.
    pub fn list_active(&self) -> Vec<Arc<ModuleDescriptor>> {
        self.snapshot.load().modules().cloned().collect()
    }

    /// Every module in the store (active or not), bypassing the cache.
    pub async fn list_all(&self) -> Result<Vec<ModuleDescriptor>, RegistryError> {
        self.store.fetch_all().await.map_err(|e| {
            tracing::error!("Failed to list modules: {}", e);
            e.into()
        })
    }
}
