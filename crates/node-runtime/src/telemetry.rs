//! # Telemetry
//!
//! Structured logging initialization.
//!
//! Logs carry consistent fields (`originator_id`, `sequence_id`,
//! `staging_id`) so aggregators can parse them; the JSON layer is for
//! containers/production, the plain layer for local runs. The filter is
//! env-overridable via `RUST_LOG`.

use crate::container::config::TelemetrySettings;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter or subscriber could not be installed.
    #[error("failed to initialize telemetry: {0}")]
    Init(String),
}

/// Initializes the global tracing subscriber.
///
/// Callable once per process; a second call reports `Init`.
pub fn init_telemetry(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .map_err(|err| TelemetryError::Init(err.to_string()))?;

    if settings.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_current_span(false)
            .try_init()
            .map_err(|err| TelemetryError::Init(err.to_string()))?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
            .map_err(|err| TelemetryError::Init(err.to_string()))?;
    }

    Ok(())
}
