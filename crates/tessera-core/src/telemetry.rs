//! Tracing bootstrap.
//!
//! Libraries in this workspace only emit `tracing` events and `metrics`
//! counters. Hosts call [`init_tracing`] once at startup and install their
//! own metrics recorder.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "tessera=info";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Build the filter: `RUST_LOG` when set, otherwise `filter`.
pub fn env_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::Filter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Install a global fmt subscriber filtered by `filter`.
pub fn init_tracing(filter: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(filter)?)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInstalled)
}
