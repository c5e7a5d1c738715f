//! Configuration loading.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `TESSERA_*`
//! environment variables. Validation runs last and reports every problem at
//! once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tessera_audit::AuditSettings;
use tessera_resilience::{BreakerConfig, RetrySettings};
use tracing_subscriber::EnvFilter;

use crate::telemetry::DEFAULT_LOG_FILTER;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "TESSERA_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),
}

/// One semantic problem with a loaded configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Complete Tessera configuration. Every field has a default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// Defaults for every circuit breaker.
    pub breaker: BreakerConfig,
    /// Per-dependency breaker settings, keyed by dependency name. Fields
    /// omitted in an override take the built-in defaults.
    pub dependencies: BTreeMap<String, BreakerConfig>,
    pub retry: RetrySettings,
    pub audit: AuditSettings,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Classifications slower than this log a warning.
    pub slow_classification_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            slow_classification_ms: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    /// Include technical details in outward error bodies.
    pub detailed_logging_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            detailed_logging_enabled: false,
        }
    }
}

impl TesseraConfig {
    /// Read `path`, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&contents)?;
        config.apply_env()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated. For deployments
    /// without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a full variable name such
    /// as `TESSERA_MAX_RETRIES` to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env {
            lookup: &lookup,
        };
        env.set("FAILURE_THRESHOLD", &mut self.breaker.failure_threshold)?;
        env.set("RECOVERY_TIMEOUT_MS", &mut self.breaker.recovery_timeout_ms)?;
        env.set("MONITORING_WINDOW_MS", &mut self.breaker.monitoring_window_ms)?;
        env.set("SUCCESSES_TO_CLOSE", &mut self.breaker.successes_to_close)?;
        env.set("CALL_TIMEOUT_MS", &mut self.breaker.call_timeout_ms)?;
        env.set("MAX_RETRIES", &mut self.retry.max_retries)?;
        env.set("BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        env.set("MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        env.set("AUDIT_RETENTION_YEARS", &mut self.audit.retention_years)?;
        env.set("ARCHIVE_TIMEOUT_MS", &mut self.audit.archive_timeout_ms)?;
        env.set("ENVIRONMENT", &mut self.audit.environment)?;
        env.set(
            "SLOW_CLASSIFICATION_MS",
            &mut self.classifier.slow_classification_ms,
        )?;
        env.set("LOG_FILTER", &mut self.logging.filter)?;
        env.set_flag(
            "DETAILED_LOGGING",
            &mut self.logging.detailed_logging_enabled,
        )?;
        Ok(())
    }

    /// Semantic checks. Returns every violation, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        check_breaker("breaker", &self.breaker, &mut errors);
        for (name, config) in &self.dependencies {
            if tessera_store::validate_key(name).is_err() {
                errors.push(ValidationError::new(
                    format!("dependencies.{name}"),
                    "dependency names use letters, digits, '.', '_' and '-'",
                ));
            }
            check_breaker(&format!("dependencies.{name}"), config, &mut errors);
        }

        if self.retry.base_delay_ms == 0 && self.retry.max_retries > 0 {
            errors.push(ValidationError::new(
                "retry.base_delay_ms",
                "must be positive when retries are enabled",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(ValidationError::new(
                "retry.max_delay_ms",
                "must not be below retry.base_delay_ms",
            ));
        }

        if !(1..=100).contains(&self.audit.retention_years) {
            errors.push(ValidationError::new(
                "audit.retention_years",
                "must be between 1 and 100",
            ));
        }
        if self.audit.archive_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "audit.archive_timeout_ms",
                "must be positive",
            ));
        }
        if self.audit.environment.trim().is_empty() {
            errors.push(ValidationError::new("audit.environment", "must not be empty"));
        }

        if self.classifier.slow_classification_ms == 0 {
            errors.push(ValidationError::new(
                "classifier.slow_classification_ms",
                "must be positive",
            ));
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.filter) {
            errors.push(ValidationError::new("logging.filter", e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_breaker(prefix: &str, c: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    let positive = [
        ("failure_threshold", u64::from(c.failure_threshold)),
        ("successes_to_close", u64::from(c.successes_to_close)),
        ("recovery_timeout_ms", c.recovery_timeout_ms),
        ("monitoring_window_ms", c.monitoring_window_ms),
        ("call_timeout_ms", c.call_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.{field}"),
                "must be positive",
            ));
        }
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, suffix: &str) -> Option<(String, String)> {
        let var = format!("{ENV_PREFIX}{suffix}");
        (self.lookup)(&var).map(|value| (var, value))
    }

    fn set<T>(&self, suffix: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if let Some((var, value)) = self.get(suffix) {
            *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                reason: e.to_string(),
                var,
                value,
            })?;
        }
        Ok(())
    }

    fn set_flag(&self, suffix: &str, slot: &mut bool) -> Result<(), ConfigError> {
        if let Some((var, value)) = self.get(suffix) {
            *slot = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var,
                        value,
                        reason: "expected a boolean".into(),
                    })
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let c = TesseraConfig::default();
        assert_eq!(c.breaker.failure_threshold, 5);
        assert_eq!(c.audit.retention_years, 7);
        assert_eq!(c.classifier.slow_classification_ms, 5);
        assert_eq!(c.logging.filter, "tessera=info");
        assert!(!c.logging.detailed_logging_enabled);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn toml_sections_and_overrides() {
        let c = TesseraConfig::parse(
            r#"
            [breaker]
            failure_threshold = 3

            [dependencies.bedrock]
            call_timeout_ms = 120000

            [retry]
            max_retries = 1

            [audit]
            environment = "production"

            [logging]
            detailed_logging_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(c.breaker.failure_threshold, 3);
        assert_eq!(c.breaker.recovery_timeout_ms, 30_000);
        assert_eq!(c.dependencies["bedrock"].call_timeout_ms, 120_000);
        assert_eq!(c.dependencies["bedrock"].failure_threshold, 5);
        assert_eq!(c.retry.max_retries, 1);
        assert_eq!(c.audit.environment, "production");
        assert!(c.logging.detailed_logging_enabled);
    }

    #[test]
    fn unknown_syntax_is_a_parse_error() {
        assert!(matches!(
            TesseraConfig::parse("[breaker\nfailure_threshold = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_wins_over_file() {
        let mut c = TesseraConfig::parse("[retry]\nmax_retries = 1").unwrap();
        c.apply_env_from(env(&[
            ("TESSERA_MAX_RETRIES", "4"),
            ("TESSERA_ENVIRONMENT", "staging"),
            ("TESSERA_DETAILED_LOGGING", "yes"),
            ("TESSERA_LOG_FILTER", "tessera=debug"),
        ]))
        .unwrap();
        assert_eq!(c.retry.max_retries, 4);
        assert_eq!(c.audit.environment, "staging");
        assert!(c.logging.detailed_logging_enabled);
        assert_eq!(c.logging.filter, "tessera=debug");
    }

    #[test]
    fn malformed_environment_value_names_the_variable() {
        let mut c = TesseraConfig::default();
        let err = c
            .apply_env_from(env(&[("TESSERA_FAILURE_THRESHOLD", "five")]))
            .unwrap_err();
        match err {
            ConfigError::Env { var, value, .. } => {
                assert_eq!(var, "TESSERA_FAILURE_THRESHOLD");
                assert_eq!(value, "five");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(c
            .apply_env_from(env(&[("TESSERA_DETAILED_LOGGING", "maybe")]))
            .is_err());
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut c = TesseraConfig::default();
        c.breaker.failure_threshold = 0;
        c.retry.base_delay_ms = 10_000;
        c.audit.retention_years = 0;
        c.audit.environment = " ".into();
        c.dependencies
            .insert("bad name".into(), BreakerConfig::default());

        let errors = c.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "breaker.failure_threshold",
                "dependencies.bad name",
                "retry.max_delay_ms",
                "audit.retention_years",
                "audit.environment",
            ]
        );
        let message = ConfigError::Invalid(errors).to_string();
        assert!(message.contains("breaker.failure_threshold: must be positive"));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "[audit]\nretention_years = 10\n").unwrap();
        let c = TesseraConfig::load(&path).unwrap();
        assert_eq!(c.audit.retention_years, 10);

        let missing = TesseraConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
