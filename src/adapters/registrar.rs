//! Self-registration client used by module services (and `modgate register`).
//!
//! Reads a JSON manifest and posts `{manifest, url}` to a running gateway's
//! registration endpoint.
use std::{path::Path, time::Duration};

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

pub const DEFAULT_GATEWAY_URL: &str = "http://api-gateway:8080";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("Failed to read manifest {path}: {source}")]
    ReadManifest {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest {path} is not valid JSON: {source}")]
    ParseManifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected registration ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// What the gateway answered on success.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationReceipt {
    pub status: String,
    #[serde(default)]
    pub module: Value,
}

pub struct ModuleRegistrar {
    client: reqwest::Client,
    service_url: String,
    gateway_url: String,
    api_prefix: String,
}

impl ModuleRegistrar {
    pub fn new(
        service_url: impl Into<String>,
        gateway_url: impl Into<String>,
    ) -> Result<Self, RegistrarError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            service_url: service_url.into(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
        })
    }

    pub fn with_api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}/modules/register", self.gateway_url, self.api_prefix)
    }

    /// Register the manifest stored at `manifest_path`.
    pub async fn register(
        &self,
        manifest_path: impl AsRef<Path>,
    ) -> Result<RegistrationReceipt, RegistrarError> {
        let path = manifest_path.as_ref();
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| RegistrarError::ReadManifest {
                    path: path.display().to_string(),
                    source,
                })?;
        let manifest: Value =
            serde_json::from_str(&content).map_err(|source| RegistrarError::ParseManifest {
                path: path.display().to_string(),
                source,
            })?;

        self.register_manifest(manifest).await
    }

    pub async fn register_manifest(
        &self,
        manifest: Value,
    ) -> Result<RegistrationReceipt, RegistrarError> {
        tracing::info!(
            "Registering module {} ({}) at {} with {}",
            manifest["name"].as_str().unwrap_or("<unnamed>"),
            manifest["version"].as_str().unwrap_or("unversioned"),
            self.service_url,
            self.gateway_url
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&json!({ "manifest": manifest, "url": self.service_url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Gateway rejected registration ({}): {}", status, body);
            return Err(RegistrarError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: RegistrationReceipt = response.json().await?;
        tracing::info!("Module registered successfully: {}", receipt.status);
        Ok(receipt)
    }
}
