//! Tracing subscriber initialization.

use hearth_core::{ConfigError, HearthError, HearthResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "hearth_pipeline=info,hearth_llm=info,hearth_storage=info,warn";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `HEARTH_LOG_FORMAT` (`json` or `pretty`).
    pub fn from_env() -> Self {
        let format = match std::env::var("HEARTH_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            format,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. `RUST_LOG` overrides the default filter. A second
/// call fails because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> HearthResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| {
            HearthError::Config(ConfigError::InvalidValue {
                field: "default_filter".to_string(),
                value: config.default_filter.clone(),
                reason: e.to_string(),
            })
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| {
        HearthError::Config(ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: format!("{:?}", config.format),
            reason: e.to_string(),
        })
    })?;

    tracing::info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
