//! PostgreSQL-backed module table (`system_modules`).
//!
//! Routes and manifests are stored as JSONB. The pool is created lazily so a
//! database that is down at boot only empties the initial routing table
//! instead of aborting startup.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};

use crate::{
    core::module::{ModuleDescriptor, ModuleRegistration, ModuleStatus, RouteRule},
    ports::module_store::{ModuleStore, StoreError, StoreResult},
};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS system_modules (
    name        TEXT PRIMARY KEY,
    version     TEXT,
    url         TEXT NOT NULL,
    routes      JSONB NOT NULL DEFAULT '[]'::jsonb,
    manifest    JSONB,
    status      TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'inactive')),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const SELECT_ACTIVE: &str = r#"
SELECT name, version, url, routes, manifest, status, updated_at
FROM system_modules
WHERE status = 'active'
ORDER BY name
"#;

const SELECT_ALL: &str = r#"
SELECT name, version, url, routes, manifest, status, updated_at
FROM system_modules
ORDER BY name
"#;

const UPSERT: &str = r#"
INSERT INTO system_modules (name, version, url, routes, manifest, status, updated_at)
VALUES ($1, $2, $3, $4, $5, 'active', CURRENT_TIMESTAMP)
ON CONFLICT (name)
DO UPDATE SET
    version = EXCLUDED.version,
    url = EXCLUDED.url,
    routes = EXCLUDED.routes,
    manifest = EXCLUDED.manifest,
    status = 'active',
    updated_at = CURRENT_TIMESTAMP
RETURNING name, version, url, routes, manifest, status, updated_at
"#;

const UPDATE_STATUS: &str = r#"
UPDATE system_modules
SET status = $1, updated_at = CURRENT_TIMESTAMP
WHERE name = $2
RETURNING name, version, url, routes, manifest, status, updated_at
"#;

pub struct PostgresModuleStore {
    pool: PgPool,
}

impl PostgresModuleStore {
    /// Build a lazily-connecting pool. Only the URL is validated here.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(map_sqlx_error)?;

        tracing::info!(
            "Created PostgreSQL module store pool (max {} connections)",
            max_connections
        );
        Ok(Self { pool })
    }

    /// Create `system_modules` if it does not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        tracing::debug!("system_modules table is present");
        Ok(())
    }

    async fn fetch(&self, statement: &'static str) -> StoreResult<Vec<ModuleDescriptor>> {
        let rows = sqlx::query(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        decode_rows(rows.iter().map(decode_row))
    }
}

#[async_trait]
impl ModuleStore for PostgresModuleStore {
    async fn fetch_active(&self) -> StoreResult<Vec<ModuleDescriptor>> {
        self.fetch(SELECT_ACTIVE).await
    }

    async fn fetch_all(&self) -> StoreResult<Vec<ModuleDescriptor>> {
        self.fetch(SELECT_ALL).await
    }

    async fn upsert(&self, registration: ModuleRegistration) -> StoreResult<ModuleDescriptor> {
        let row = sqlx::query(UPSERT)
            .bind(&registration.name)
            .bind(&registration.version)
            .bind(&registration.url)
            .bind(Json(&registration.routes))
            .bind(&registration.manifest)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        decode_row(&row)
    }

    async fn set_status(
        &self,
        name: &str,
        status: ModuleStatus,
    ) -> StoreResult<Option<ModuleDescriptor>> {
        let row = sqlx::query(UPDATE_STATUS)
            .bind(status.as_str())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_row).transpose()
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Query(e.to_string()),
    }
}

/// Keep every row that decodes. A corrupt row is logged and skipped so it
/// cannot block the rest of the table from being routed.
fn decode_rows(
    rows: impl IntoIterator<Item = StoreResult<ModuleDescriptor>>,
) -> StoreResult<Vec<ModuleDescriptor>> {
    let mut modules = Vec::new();
    for row in rows {
        match row {
            Ok(module) => modules.push(module),
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::error!("Skipping module row: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(modules)
}

fn decode_row(row: &PgRow) -> StoreResult<ModuleDescriptor> {
    let name: String = row.try_get("name").map_err(map_sqlx_error)?;
    let corrupt = |column: &str, message: String| StoreError::Corrupt {
        name: name.clone(),
        message: format!("{column}: {message}"),
    };

    let version: Option<String> = row
        .try_get("version")
        .map_err(|e| corrupt("version", e.to_string()))?;
    let url: String = row
        .try_get("url")
        .map_err(|e| corrupt("url", e.to_string()))?;
    let routes: Option<Json<Vec<RouteRule>>> = row
        .try_get("routes")
        .map_err(|e| corrupt("routes", e.to_string()))?;
    let manifest: Option<serde_json::Value> = row
        .try_get("manifest")
        .map_err(|e| corrupt("manifest", e.to_string()))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| corrupt("status", e.to_string()))?;
    let status: ModuleStatus = status
        .parse()
        .map_err(|e: crate::core::module::ModuleError| corrupt("status", e.to_string()))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| corrupt("updated_at", e.to_string()))?;

    Ok(ModuleDescriptor {
        name,
        version: version.unwrap_or_default(),
        url,
        routes: routes.map(|Json(routes)| routes).unwrap_or_default(),
        manifest: manifest.unwrap_or(serde_json::Value::Null),
        status,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            url: format!("http://{name}:4000"),
            routes: vec![RouteRule::any(format!("/{name}"))],
            manifest: serde_json::Value::Null,
            status: ModuleStatus::Active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let rows = vec![
            Ok(module("attendance")),
            Err(StoreError::Corrupt {
                name: "broken".to_string(),
                message: "routes: missing field `path`".to_string(),
            }),
            Ok(module("fees")),
        ];

        let modules = decode_rows(rows).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["attendance", "fees"]);
    }

    #[test]
    fn test_query_errors_still_fail_the_fetch() {
        let rows = vec![
            Ok(module("attendance")),
            Err(StoreError::Query("column \"name\" not found".to_string())),
        ];
        assert!(matches!(decode_rows(rows), Err(StoreError::Query(_))));
    }

    #[test]
    fn test_pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_lazy_rejects_malformed_url() {
        let result = PostgresModuleStore::connect_lazy("not-a-url", 1, Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_database_is_an_error() {
        let store = PostgresModuleStore::connect_lazy(
            "postgres://postgres@127.0.0.1:1/modgate",
            1,
            Duration::from_millis(300),
        )
        .unwrap();
        assert!(store.fetch_active().await.is_err());
    }
}
