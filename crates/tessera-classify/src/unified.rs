use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_types::CorrelationId;

use crate::classifier::ErrorClassification;
use crate::error::{ErrorContext, ServiceError};
use crate::taxonomy::{ErrorCategory, ErrorCode, RecoveryStrategy};

pub const SUPPORT_CONTACT: &str = "support@tessera.health";

/// A classified failure ready to be logged and returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnifiedError {
    pub error_code: ErrorCode,
    pub user_message: String,
    /// Raw error text. Logs only.
    pub technical_message: String,
    pub fallback_available: bool,
    pub retry_after: Option<Duration>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub operation: String,
    pub classification: ErrorClassification,
}

impl UnifiedError {
    pub(crate) fn new(
        error: &ServiceError,
        ctx: &ErrorContext,
        classification: ErrorClassification,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            error_code: classification.error_code,
            user_message: classification.error_code.user_message().to_string(),
            technical_message: error.to_string(),
            fallback_available: classification.recovery_strategy == RecoveryStrategy::Fallback,
            retry_after,
            correlation_id: ctx.correlation_id.clone(),
            timestamp: classification.timestamp,
            service: ctx.service.clone(),
            operation: ctx.operation.clone(),
            classification,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_code.status_code()
    }

    /// The body returned to callers. `detailed` adds technical details and
    /// should only be set where `detailed_logging_enabled` is configured.
    /// The raw `technical_message` never appears in either form.
    pub fn to_outward(&self, detailed: bool) -> OutwardError {
        let retryable = matches!(
            self.classification.recovery_strategy,
            RecoveryStrategy::Retry | RecoveryStrategy::Fallback
        );
        OutwardError {
            error: true,
            code: self.error_code,
            message: self.user_message.clone(),
            correlation_id: self.correlation_id.clone(),
            timestamp: self.timestamp,
            support_info: SupportInfo {
                reference: self.correlation_id.to_string(),
                contact: SUPPORT_CONTACT.to_string(),
                retryable,
                retry_after_seconds: self.retry_after.map(ceil_secs),
            },
            technical_details: detailed.then(|| TechnicalDetails {
                category: self.classification.category,
                recovery_strategy: self.classification.recovery_strategy,
                service: self.service.clone(),
                operation: self.operation.clone(),
            }),
        }
    }

    /// HTTP response with an outward body, status, and `Retry-After` when
    /// known.
    pub fn into_response_with(self, detailed: bool) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after.map(ceil_secs);
        let mut response = (status, Json(self.to_outward(detailed))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl IntoResponse for UnifiedError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

/// Wire shape of every error Tessera-backed handlers return.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutwardError {
    pub error: bool,
    pub code: ErrorCode,
    pub message: String,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub support_info: SupportInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_details: Option<TechnicalDetails>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportInfo {
    pub reference: String,
    pub contact: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TechnicalDetails {
    pub category: ErrorCategory,
    pub recovery_strategy: RecoveryStrategy,
    pub service: String,
    pub operation: String,
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
