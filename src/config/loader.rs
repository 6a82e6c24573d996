use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Environment variables named `MODGATE__SECTION__KEY` override file values.
pub const ENV_PREFIX: &str = "MODGATE";

/// Load configuration from a file using the config crate, layered with
/// `MODGATE__*` environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously.
///
/// A missing file is not an error: the gateway can be configured entirely
/// through the environment.
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    if !config_path.exists() {
        tracing::warn!(
            "Configuration file {} not found, using defaults and environment",
            config_path.display()
        );
    }

    let settings = Config::builder()
        .add_source(
            File::new(
                config_path
                    .to_str()
                    .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
                format,
            )
            .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}
