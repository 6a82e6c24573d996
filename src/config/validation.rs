#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use eyre::Result;

use crate::config::models::{
    FallbackRouteConfig, GatewayConfig, ProxyConfig, RateLimitConfig, RegistryConfig, StoreConfig,
    StoreKind,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem
    /// instead of stopping at the first one.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_api_prefix(&config.api_prefix) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_registry(&config.registry) {
            errors.push(e);
        }

        if let Err(mut store_errors) = Self::validate_store(&config.store) {
            errors.append(&mut store_errors);
        }

        if let Err(e) = Self::validate_proxy(&config.proxy) {
            errors.push(e);
        }

        for (index, route) in config.fallback_routes.iter().enumerate() {
            if let Err(mut route_errors) = Self::validate_fallback_route(index, route) {
                errors.append(&mut route_errors);
            }
        }

        if let Some(rate_limit) = &config.rate_limit {
            if let Err(e) = Self::validate_rate_limit(rate_limit) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_api_prefix(prefix: &str) -> ValidationResult<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ValidationError::InvalidField {
                field: "api_prefix".to_string(),
                message: "API prefix must start with '/' and must not end with '/'".to_string(),
            });
        }
        Ok(())
    }

    fn validate_registry(config: &RegistryConfig) -> ValidationResult<()> {
        match config.refresh_interval() {
            Ok(interval) if interval.is_zero() => Err(ValidationError::InvalidField {
                field: "registry.refresh_interval".to_string(),
                message: "Refresh interval must be greater than 0".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(ValidationError::InvalidField {
                field: "registry.refresh_interval".to_string(),
                message: format!("Invalid duration '{}': {e}", config.refresh_interval),
            }),
        }
    }

    fn validate_store(config: &StoreConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.kind == StoreKind::Postgres {
            match config.url.as_deref() {
                None | Some("") => errors.push(ValidationError::MissingField {
                    field: "store.url".to_string(),
                }),
                Some(url) => {
                    if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                        errors.push(ValidationError::InvalidField {
                            field: "store.url".to_string(),
                            message: "URL scheme must be 'postgres' or 'postgresql'".to_string(),
                        });
                    }
                }
            }

            if config.max_connections == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "store.max_connections".to_string(),
                    message: "Pool size must be greater than 0".to_string(),
                });
            }

            if config.connect_timeout_secs == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "store.connect_timeout_secs".to_string(),
                    message: "Connect timeout must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_proxy(config: &ProxyConfig) -> ValidationResult<()> {
        if config.timeout_secs == 0 {
            return Err(ValidationError::InvalidField {
                field: "proxy.timeout_secs".to_string(),
                message: "Proxy timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_fallback_route(
        index: usize,
        route: &FallbackRouteConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !route.prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("fallback_routes[{index}].prefix"),
                message: "Prefix must start with '/'".to_string(),
            });
        }

        if let Err(e) = Self::validate_url(&route.target, &format!("fallback_routes[{index}].target"))
        {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Validate rate limit configuration
    fn validate_rate_limit(config: &RateLimitConfig) -> ValidationResult<()> {
        if config.requests == 0 || config.requests > u64::from(u32::MAX) {
            return Err(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "Rate limit requests must be between 1 and 4294967295".to_string(),
            });
        }

        match humantime::parse_duration(&config.period) {
            Ok(period) if !period.is_zero() => {}
            _ => {
                return Err(ValidationError::InvalidField {
                    field: "rate_limit.period".to_string(),
                    message: "Period must be a non-zero duration like '1s', '1m', or '15m'"
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
