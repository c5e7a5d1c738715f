use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_resilience::{CircuitBreakerRegistry, CircuitState};
use tessera_types::CorrelationId;
use tracing::{debug, warn};

use crate::error::{ErrorContext, ServiceError};
use crate::taxonomy::{ErrorCategory, ErrorCode, RecoveryStrategy};
use crate::unified::UnifiedError;

/// Default budget for one classification.
pub const DEFAULT_SLOW_CLASSIFICATION: Duration = Duration::from_millis(5);

/// Derived, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub recovery_strategy: RecoveryStrategy,
    pub error_code: ErrorCode,
    pub correlation_id: CorrelationId,
    /// State of the breaker for the failing service, when one is known.
    pub circuit_breaker_status: Option<CircuitState>,
    pub timestamp: DateTime<Utc>,
}

/// Turns failures into [`ErrorClassification`]s and [`UnifiedError`]s.
///
/// Holds the process's shared [`CircuitBreakerRegistry`] so handlers without
/// a breaker of their own can report dependency outcomes to it.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    registry: Option<Arc<CircuitBreakerRegistry>>,
    slow_threshold: Duration,
}

impl ErrorClassifier {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            registry: Some(registry),
            slow_threshold: DEFAULT_SLOW_CLASSIFICATION,
        }
    }

    /// A classifier with no breaker status lookup.
    pub fn standalone() -> Self {
        Self {
            registry: None,
            slow_threshold: DEFAULT_SLOW_CLASSIFICATION,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn registry(&self) -> Option<&Arc<CircuitBreakerRegistry>> {
        self.registry.as_ref()
    }

    /// Classify a typed error. Category, strategy, and code depend only on
    /// the error variant.
    pub fn categorize(&self, error: &ServiceError, ctx: &ErrorContext) -> ErrorClassification {
        let started = Instant::now();
        let classification = ErrorClassification {
            category: error.category(),
            recovery_strategy: error.recovery_strategy(),
            error_code: error.code(),
            correlation_id: ctx.correlation_id.clone(),
            circuit_breaker_status: self.breaker_status(&ctx.service),
            timestamp: Utc::now(),
        };

        metrics::counter!(
            "tessera_errors_classified_total",
            "category" => classification.category.as_str()
        )
        .increment(1);

        let elapsed = started.elapsed();
        if elapsed > self.slow_threshold {
            warn!(
                service = %ctx.service,
                operation = %ctx.operation,
                elapsed_us = elapsed.as_micros() as u64,
                "slow error classification"
            );
        }
        debug!(
            service = %ctx.service,
            operation = %ctx.operation,
            category = %classification.category,
            strategy = %classification.recovery_strategy,
            correlation_id = %ctx.correlation_id,
            "error classified"
        );
        classification
    }

    /// Classify untyped error text via [`ServiceError::infer`].
    pub fn categorize_message(&self, message: &str, ctx: &ErrorContext) -> ErrorClassification {
        self.categorize(&ServiceError::infer(message, ctx), ctx)
    }

    pub fn create_unified_error(&self, error: &ServiceError, ctx: &ErrorContext) -> UnifiedError {
        let classification = self.categorize(error, ctx);
        let retry_after = error.retry_after().or_else(|| self.open_retry_after(&ctx.service));
        let unified = UnifiedError::new(error, ctx, classification, retry_after);
        debug!(
            correlation_id = %unified.correlation_id,
            technical = %unified.technical_message,
            "unified error created"
        );
        unified
    }

    /// Feed an observed dependency outcome into the shared breaker.
    pub fn report_outcome(&self, dependency: &str, success: bool) {
        if let Some(registry) = &self.registry {
            registry.report_outcome(dependency, success);
        }
    }

    fn breaker_status(&self, service: &str) -> Option<CircuitState> {
        let registry = self.registry.as_ref()?;
        registry.status(service).ok()
    }

    fn open_retry_after(&self, service: &str) -> Option<Duration> {
        let registry = self.registry.as_ref()?;
        let metrics = registry.metrics(service).ok()?;
        metrics.retry_after_ms.map(Duration::from_millis)
    }
}
