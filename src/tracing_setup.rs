use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::{LogFormat, LoggingConfig};

/// Build the filter: `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize structured logging for modgate from the `logging` config section.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = env_filter(&config.level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(
        "modgate logging initialized (format: {:?}, level: {})",
        config.format,
        config.level
    );
    Ok(())
}

/// Span wrapping one registry refresh.
pub fn create_refresh_span(trigger: &'static str) -> tracing::Span {
    tracing::info_span!(
        "registry_refresh",
        trigger = trigger,
        snapshot_version = tracing::field::Empty,
        modules = tracing::field::Empty,
    )
}
