use std::time::Duration;

use tessera_resilience::{CallError, FailureKind, RetrySignal};
use tessera_types::CorrelationId;

use crate::taxonomy::{ErrorCategory, ErrorCode, RecoveryStrategy};

/// Dependencies recognised as external by name.
const STORAGE_SERVICES: &[&str] = &["s3", "object-store", "dynamodb", "rds", "postgres", "database"];
const INFERENCE_SERVICES: &[&str] = &["bedrock", "inference", "llm"];
const VAULT_SERVICES: &[&str] = &["vault", "secrets-manager", "kms"];
const IDENTITY_SERVICES: &[&str] = &["cognito", "idp", "oauth", "google", "apple"];

/// Errors raised by Tessera collaborators, each already carrying its
/// category.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("storage error from {service}: {message}")]
    Storage { service: String, message: String },

    #[error("inference endpoint error: {message}")]
    Inference { message: String },

    #[error("secret vault error: {message}")]
    Vault { message: String },

    #[error("identity provider {provider} error: {message}")]
    IdentityProvider { provider: String, message: String },

    #[error("{service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    #[error("circuit open for {dependency}")]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    #[error("validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("authorization denied: {message}")]
    Authorization { message: String },

    #[error("business rule {rule} violated: {message}")]
    BusinessRule { rule: String, message: String },

    #[error("audit write failed: {message}")]
    AuditWrite { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage { .. }
            | Self::Inference { .. }
            | Self::Vault { .. }
            | Self::IdentityProvider { .. }
            | Self::Timeout { .. }
            | Self::CircuitOpen { .. } => ErrorCategory::External,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } | Self::Authorization { .. } | Self::BusinessRule { .. } => {
                ErrorCategory::Business
            }
            Self::AuditWrite { .. } | Self::Internal { .. } => ErrorCategory::Technical,
        }
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Self::CircuitOpen { .. } => RecoveryStrategy::Fallback,
            Self::AuditWrite { .. } => RecoveryStrategy::Ignore,
            other => other.category().recovery_strategy(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Storage { .. } => ErrorCode::StorageUnavailable,
            Self::Inference { .. } => ErrorCode::InferenceUnavailable,
            Self::Vault { .. } => ErrorCode::VaultUnavailable,
            Self::IdentityProvider { .. } => ErrorCode::IdentityProviderError,
            Self::Timeout { .. } => ErrorCode::DependencyTimeout,
            Self::CircuitOpen { .. } => ErrorCode::ServiceTemporarilyUnavailable,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::Authentication { .. } => ErrorCode::AuthenticationRequired,
            Self::Authorization { .. } => ErrorCode::AccessDenied,
            Self::BusinessRule { .. } => ErrorCode::BusinessRuleViolation,
            Self::AuditWrite { .. } => ErrorCode::AuditLogDegraded,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Build a typed error from untyped text.
    ///
    /// Rules, first match wins:
    /// 1. authentication / token / authorization wording: business refusal
    /// 2. validation / invalid / required / format: validation
    /// 3. a known external service or a timeout: external
    /// 4. anything else: internal
    ///
    /// Deterministic in `(message, ctx.service, ctx.operation)`.
    pub fn infer(message: &str, ctx: &ErrorContext) -> Self {
        let lower = message.to_ascii_lowercase();
        // Keywords and dependency names match whole words only, so "format"
        // does not fire inside "information".
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();
        let has = |phrases: &[&str]| phrases.iter().any(|p| contains_phrase(&words, p));
        let message = message.to_string();

        if has(&["authorization", "forbidden", "permission", "not allowed"]) {
            return Self::Authorization { message };
        }
        if has(&[
            "authentication",
            "unauthenticated",
            "unauthorized",
            "token",
            "tokens",
            "credential",
            "credentials",
        ]) {
            return Self::Authentication { message };
        }
        if has(&["validation", "invalid", "required", "format", "malformed"]) {
            return Self::Validation {
                field: None,
                message,
            };
        }
        if has(&["timeout", "timeouts", "timed out", "deadline exceeded"]) {
            return Self::Timeout {
                service: ctx.service.clone(),
                after: Duration::ZERO,
            };
        }

        // `s3.get_object` style service names match on their first segment.
        let service = ctx.service.to_ascii_lowercase();
        let service_root = service.split('.').next().unwrap_or_default();
        let is = |names: &[&str]| {
            names
                .iter()
                .any(|n| service_root == *n || words.contains(n))
        };
        if is(STORAGE_SERVICES) {
            Self::Storage {
                service: ctx.service.clone(),
                message,
            }
        } else if is(INFERENCE_SERVICES) {
            Self::Inference { message }
        } else if is(VAULT_SERVICES) {
            Self::Vault { message }
        } else if is(IDENTITY_SERVICES) {
            Self::IdentityProvider {
                provider: ctx.service.clone(),
                message,
            }
        } else {
            Self::Internal { message }
        }
    }

    /// Fold a breaker failure for `dependency` into the taxonomy.
    pub fn from_call(err: CallError<ServiceError>, dependency: &str) -> Self {
        match err {
            CallError::Open {
                dependency,
                retry_after,
                ..
            } => Self::CircuitOpen {
                dependency,
                retry_after,
            },
            CallError::Timeout { timeout } => Self::Timeout {
                service: dependency.to_string(),
                after: timeout,
            },
            CallError::Operation(e) => e,
        }
    }
}

/// `phrase` is one or more space-separated words appearing consecutively.
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Validation and business refusals are the caller's problem, not the
/// dependency's.
impl FailureKind for ServiceError {
    fn is_expected(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Business
        )
    }
}

impl RetrySignal for ServiceError {
    fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Where an error happened.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub service: String,
    pub operation: String,
    /// Raw subject id. Held for correlation by the caller; never logged or
    /// included in any classification output.
    pub user_id: Option<String>,
    pub correlation_id: CorrelationId,
}

impl ErrorContext {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            user_id: None,
            correlation_id: CorrelationId::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }
}
