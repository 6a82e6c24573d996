//! Configuration data structures for modgate.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `MODGATE__*` environment variables. Every section has defaults so a
//! minimal config only needs the store location.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{dispatcher::MatchPolicy, registry::DEFAULT_REFRESH_INTERVAL};

fn default_true() -> bool {
    true
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the gateway listens on
    pub listen_addr: String,
    /// Path prefix shared by the management API and proxied module routes.
    /// Stripped before dispatch and before forwarding.
    pub api_prefix: String,
    pub registry: RegistryConfig,
    pub store: StoreConfig,
    pub proxy: ProxyConfig,
    /// Static routes tried when no registered module matches
    pub fallback_routes: Vec<FallbackRouteConfig>,
    /// Per-client-IP request quota; disabled when absent
    pub rate_limit: Option<RateLimitConfig>,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            api_prefix: "/api/v1".to_string(),
            registry: RegistryConfig::default(),
            store: StoreConfig::default(),
            proxy: ProxyConfig::default(),
            fallback_routes: Vec::new(),
            rate_limit: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Module registry behaviour.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// Period between background refreshes, parsed by humantime ("30s", "1m")
    pub refresh_interval: String,
    /// How overlapping route prefixes are resolved
    pub match_policy: MatchPolicy,
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.refresh_interval)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: humantime::format_duration(DEFAULT_REFRESH_INTERVAL).to_string(),
            match_policy: MatchPolicy::default(),
        }
    }
}

/// Which module store adapter backs the registry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Connection URL, required for `postgres`
    pub url: Option<String>,
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled connection
    pub connect_timeout_secs: u64,
    /// Create the `system_modules` table at startup when missing
    pub ensure_schema: bool,
}

impl StoreConfig {
    /// In-process store, mainly for development and tests.
    pub fn memory() -> Self {
        Self {
            kind: StoreKind::Memory,
            ..Self::default()
        }
    }

    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            kind: StoreKind::Postgres,
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Postgres,
            url: None,
            max_connections: 5,
            connect_timeout_secs: 5,
            ensure_schema: true,
        }
    }
}

/// Reverse proxy behaviour for module routes.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Time allowed for a backend to start answering
    pub timeout_secs: u64,
    /// Rewrite `Host` to the module's authority instead of passing the client's through
    pub change_origin: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            change_origin: false,
        }
    }
}

/// A fixed upstream consulted after registry dispatch finds nothing, for
/// services that do not self-register (typically authentication).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FallbackRouteConfig {
    /// Prefix matched against the path with the API prefix removed
    pub prefix: String,
    pub target: String,
    #[serde(default = "default_true")]
    pub change_origin: bool,
    /// Forward without the API prefix (module style) instead of the full path
    #[serde(default)]
    pub strip_api_prefix: bool,
}

fn default_message() -> String {
    "Too many requests, please try again later".to_string()
}

/// Behaviour when a key could not be extracted (no client address).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    #[default]
    Allow,
    Deny,
}

/// Per-client-IP rate limit configuration. Rejected requests get `429`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: u64,
    pub period: String, // Parsed by humantime, e.g., "1s", "15m", "1h"
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default)]
    pub on_missing_key: MissingKeyPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            period: "15m".to_string(),
            message: default_message(),
            on_missing_key: MissingKeyPolicy::Allow,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_refresh_interval_round_trips() {
        let registry = RegistryConfig::default();
        assert_eq!(registry.refresh_interval, "30s");
        assert_eq!(
            registry.refresh_interval().unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_fallback_route_defaults() {
        let route: FallbackRouteConfig = serde_json::from_str(
            r#"{ "prefix": "/auth", "target": "http://auth-service:3001" }"#,
        )
        .unwrap();
        assert!(route.change_origin);
        assert!(!route.strip_api_prefix);
    }

    #[test]
    fn test_rate_limit_defaults() {
        let limit: RateLimitConfig =
            serde_json::from_str(r#"{ "requests": 10, "period": "1m" }"#).unwrap();
        assert_eq!(limit.message, "Too many requests, please try again later");
        assert_eq!(limit.on_missing_key, MissingKeyPolicy::Allow);
    }
}
