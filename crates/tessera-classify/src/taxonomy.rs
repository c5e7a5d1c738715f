use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Top-level error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Infrastructure or server fault on our side.
    Technical,
    /// Malformed input from the caller.
    Validation,
    /// Authorization or business-rule refusal.
    Business,
    /// A dependency failed.
    External,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "TECHNICAL",
            Self::Validation => "VALIDATION",
            Self::Business => "BUSINESS",
            Self::External => "EXTERNAL",
        }
    }

    /// Default recovery for the category.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Self::External | Self::Technical => RecoveryStrategy::Retry,
            Self::Validation | Self::Business => RecoveryStrategy::Escalate,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Escalate,
    Ignore,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "RETRY",
            Self::Fallback => "FALLBACK",
            Self::Escalate => "ESCALATE",
            Self::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, caller-visible error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    StorageUnavailable,
    InferenceUnavailable,
    VaultUnavailable,
    IdentityProviderError,
    DependencyTimeout,
    ServiceTemporarilyUnavailable,
    ValidationFailed,
    AuthenticationRequired,
    AccessDenied,
    BusinessRuleViolation,
    AuditLogDegraded,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        Self::StorageUnavailable,
        Self::InferenceUnavailable,
        Self::VaultUnavailable,
        Self::IdentityProviderError,
        Self::DependencyTimeout,
        Self::ServiceTemporarilyUnavailable,
        Self::ValidationFailed,
        Self::AuthenticationRequired,
        Self::AccessDenied,
        Self::BusinessRuleViolation,
        Self::AuditLogDegraded,
        Self::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::InferenceUnavailable => "INFERENCE_UNAVAILABLE",
            Self::VaultUnavailable => "VAULT_UNAVAILABLE",
            Self::IdentityProviderError => "IDENTITY_PROVIDER_ERROR",
            Self::DependencyTimeout => "DEPENDENCY_TIMEOUT",
            Self::ServiceTemporarilyUnavailable => "SERVICE_TEMPORARILY_UNAVAILABLE",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            Self::AuditLogDegraded => "AUDIT_LOG_DEGRADED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show an end user. Fixed text only: never raw error
    /// output, identifiers, or health data.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::StorageUnavailable => "We could not reach our storage service. Please try again.",
            Self::InferenceUnavailable => {
                "The assistant is temporarily unavailable. Please try again shortly."
            }
            Self::VaultUnavailable => {
                "A secure service is temporarily unavailable. Please try again later."
            }
            Self::IdentityProviderError => {
                "We could not verify your sign-in provider. Please try again."
            }
            Self::DependencyTimeout => "The request took too long to complete. Please try again.",
            Self::ServiceTemporarilyUnavailable => {
                "This feature is temporarily unavailable. Please try again in a moment."
            }
            Self::ValidationFailed => {
                "Some of the information provided is invalid. Please check and resubmit."
            }
            Self::AuthenticationRequired => {
                "Your session could not be verified. Please sign in again."
            }
            Self::AccessDenied => "You do not have permission to perform this action.",
            Self::BusinessRuleViolation => {
                "This request cannot be completed under the current account rules."
            }
            Self::AuditLogDegraded => {
                "Your request succeeded, but activity logging is temporarily degraded."
            }
            Self::InternalError => "Something went wrong on our side. Please try again later.",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StorageUnavailable
            | Self::InferenceUnavailable
            | Self::VaultUnavailable
            | Self::IdentityProviderError => StatusCode::BAD_GATEWAY,
            Self::DependencyTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ServiceTemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::BusinessRuleViolation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AuditLogDegraded | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_short_sentences() {
        for code in ErrorCode::ALL {
            let words = code.user_message().split_whitespace().count();
            assert!((8..=12).contains(&words), "{code}: {words} words");
            assert!(code.user_message().ends_with('.'), "{code}");
        }
    }

    #[test]
    fn codes_serialize_as_their_string() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn strategy_follows_category() {
        assert_eq!(ErrorCategory::External.recovery_strategy(), RecoveryStrategy::Retry);
        assert_eq!(ErrorCategory::Technical.recovery_strategy(), RecoveryStrategy::Retry);
        assert_eq!(ErrorCategory::Validation.recovery_strategy(), RecoveryStrategy::Escalate);
        assert_eq!(ErrorCategory::Business.recovery_strategy(), RecoveryStrategy::Escalate);
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert!(ErrorCode::ValidationFailed.status_code().is_client_error());
        assert!(ErrorCode::AccessDenied.status_code().is_client_error());
        assert!(ErrorCode::StorageUnavailable.status_code().is_server_error());
    }
}
