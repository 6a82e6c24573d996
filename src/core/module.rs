//! Module descriptors and their route tables.
//!
//! A *module* is a backend service that registered itself with the gateway by
//! posting a manifest. The types here are shared by the registry (which caches
//! them), the store adapters (which persist them) and the HTTP layer (which
//! serializes them back to administrative callers).
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use http::Method;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Version recorded when a manifest omits one.
pub const DEFAULT_MODULE_VERSION: &str = "0.0.0";

/// Errors raised while interpreting module data supplied by callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModuleError {
    #[error("Invalid status '{0}'. Must be active or inactive")]
    InvalidStatus(String),

    #[error("Invalid route method '{0}'")]
    InvalidMethod(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Persisted lifecycle state of a module. Only `Active` modules receive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Active,
    Inactive,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Active => "active",
            ModuleStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ModuleStatus::Active),
            "inactive" => Ok(ModuleStatus::Inactive),
            other => Err(ModuleError::InvalidStatus(other.to_string())),
        }
    }
}

/// Method selector of a route rule: either every method or exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RouteMethod {
    #[default]
    All,
    Only(Method),
}

impl RouteMethod {
    /// Whether a request with `method` is accepted by this selector.
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            RouteMethod::All => true,
            RouteMethod::Only(expected) => expected == method,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RouteMethod::All => "ALL",
            RouteMethod::Only(method) => method.as_str(),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteMethod {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ModuleError::InvalidMethod(s.to_string()));
        }
        if trimmed.eq_ignore_ascii_case("ALL") {
            return Ok(RouteMethod::All);
        }
        Method::from_bytes(trimmed.to_ascii_uppercase().as_bytes())
            .map(RouteMethod::Only)
            .map_err(|_| ModuleError::InvalidMethod(s.to_string()))
    }
}

impl Serialize for RouteMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RouteMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of a module's route table: a path prefix plus a method selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub path: String,
    #[serde(default)]
    pub method: RouteMethod,
}

impl RouteRule {
    pub fn new(path: impl Into<String>, method: RouteMethod) -> Self {
        Self {
            path: path.into(),
            method,
        }
    }

    /// Rule accepting every method under `path`.
    pub fn any(path: impl Into<String>) -> Self {
        Self::new(path, RouteMethod::All)
    }

    /// Plain string-prefix test: `/fees` also covers `/fees/invoices` and `/feesX`.
    pub fn matches(&self, path: &str, method: &Method) -> bool {
        path.starts_with(self.path.as_str()) && self.method.matches(method)
    }
}

/// Persisted and cached representation of a registered backend service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub url: String,
    pub routes: Vec<RouteRule>,
    /// Manifest exactly as supplied at registration; never consulted for dispatch.
    pub manifest: serde_json::Value,
    pub status: ModuleStatus,
    pub updated_at: DateTime<Utc>,
}

impl ModuleDescriptor {
    pub fn is_active(&self) -> bool {
        self.status == ModuleStatus::Active
    }
}

/// The subset of manifest keys the gateway understands.
#[derive(Debug, Deserialize)]
struct ManifestView {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    routes: Option<Vec<RouteRule>>,
}

/// A validated registration, ready to be upserted into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRegistration {
    pub name: String,
    pub version: String,
    pub url: String,
    pub routes: Vec<RouteRule>,
    pub manifest: serde_json::Value,
}

impl ModuleRegistration {
    /// Validate a raw manifest plus service URL.
    ///
    /// The store key is the manifest `id` when present, otherwise its `name`.
    /// `name` and `routes` must both be present; an empty route table is allowed
    /// and simply never matches.
    pub fn from_manifest(manifest: serde_json::Value, url: &str) -> Result<Self, ModuleError> {
        if !manifest.is_object() {
            return Err(ModuleError::InvalidField {
                field: "manifest",
                message: "must be a JSON object".to_string(),
            });
        }

        let view: ManifestView =
            serde_json::from_value(manifest.clone()).map_err(|e| ModuleError::InvalidField {
                field: "manifest",
                message: e.to_string(),
            })?;

        let name = view
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(ModuleError::MissingField("manifest.name"))?;
        let routes = view
            .routes
            .ok_or(ModuleError::MissingField("manifest.routes"))?;

        for route in &routes {
            if !route.path.starts_with('/') {
                return Err(ModuleError::InvalidField {
                    field: "manifest.routes",
                    message: format!("route path '{}' must start with '/'", route.path),
                });
            }
        }

        let key = view
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or(name);

        Ok(Self {
            name: key,
            version: view
                .version
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODULE_VERSION.to_string()),
            url: normalize_service_url(url)?,
            routes,
            manifest,
        })
    }
}

/// Check that `url` is an absolute http(s) URL and drop any trailing slash.
pub fn normalize_service_url(url: &str) -> Result<String, ModuleError> {
    let trimmed = url.trim();
    let parsed = Url::parse(trimmed).map_err(|e| ModuleError::InvalidField {
        field: "url",
        message: format!("'{trimmed}' is not a valid URL: {e}"),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ModuleError::InvalidField {
            field: "url",
            message: format!("'{trimmed}' must start with http:// or https://"),
        });
    }
    if parsed.host_str().is_none() {
        return Err(ModuleError::InvalidField {
            field: "url",
            message: format!("'{trimmed}' has no host"),
        });
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(ModuleError::InvalidField {
            field: "url",
            message: format!("'{trimmed}' must not carry a query or fragment"),
        });
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}
