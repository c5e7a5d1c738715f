//! Wiring for Tessera hosts.
//!
//! - [`TesseraConfig`]: TOML file, `TESSERA_*` environment overrides, and
//!   validation that reports every violation at once
//! - [`telemetry::init_tracing`]: the `tracing-subscriber` bootstrap
//! - [`Core`]: circuit breaker, retry coordinator, error classifier and
//!   audit ledger composed around a single dependency call
//!
//! ```text
//! let config = TesseraConfig::load(path)?;
//! telemetry::init_tracing(&config.logging.filter)?;
//! let core = Core::new(&config, state_store, ledger);
//! let doc = core.guarded_call(&ctx, Some(event), || s3.get_object(key)).await?;
//! ```

pub mod config;
pub mod facade;
pub mod telemetry;

pub use config::{
    ClassifierConfig, ConfigError, LoggingConfig, TesseraConfig, ValidationError, ENV_PREFIX,
};
pub use facade::Core;
pub use telemetry::{init_tracing, TelemetryError, DEFAULT_LOG_FILTER};
