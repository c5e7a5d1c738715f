use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tessera_audit::{AuditEventInput, AuditLedger, InMemoryAuditRepository};
use tessera_classify::{
    ErrorClassifier, ErrorContext, OutwardError, RecoveryStrategy, ServiceError, UnifiedError,
};
use tessera_crypto::{LocalKms, PrivacyHasher};
use tessera_resilience::{CircuitBreakerRegistry, RetryCoordinator, RetryPolicy, RetrySettings};
use tessera_store::{InMemoryArchive, InMemoryStateStore, StateStore};
use tessera_types::{DataClassification, LawfulBasis};
use tracing::{debug, warn};

use crate::config::TesseraConfig;

/// The four components wired together around one dependency call.
///
/// A guarded call runs the operation through the dependency's circuit
/// breaker inside the retry coordinator. Failures are classified into a
/// [`UnifiedError`] and recorded in the audit ledger together with the
/// business event, if one was given.
#[derive(Clone, Debug)]
pub struct Core {
    registry: Arc<CircuitBreakerRegistry>,
    classifier: ErrorClassifier,
    ledger: AuditLedger,
    retry: RetrySettings,
    detailed_errors: bool,
}

impl Core {
    /// Build the breaker registry from `config` on top of `state`.
    pub fn new(config: &TesseraConfig, state: Arc<dyn StateStore>, ledger: AuditLedger) -> Self {
        let registry = config.dependencies.iter().fold(
            CircuitBreakerRegistry::new(state, config.breaker),
            |registry, (name, overrides)| registry.with_override(name.clone(), *overrides),
        );
        Self::with_registry(config, Arc::new(registry), ledger)
    }

    /// Use an existing registry, shared with other call sites.
    pub fn with_registry(
        config: &TesseraConfig,
        registry: Arc<CircuitBreakerRegistry>,
        ledger: AuditLedger,
    ) -> Self {
        let classifier = ErrorClassifier::new(Arc::clone(&registry)).with_slow_threshold(
            Duration::from_millis(config.classifier.slow_classification_ms),
        );
        Self {
            registry,
            classifier,
            ledger,
            retry: config.retry,
            detailed_errors: config.logging.detailed_logging_enabled,
        }
    }

    /// Everything in process memory with an ephemeral master key. For tests,
    /// demos, and single-node development.
    pub fn in_memory(config: &TesseraConfig, hash_secret: &[u8]) -> Self {
        let ledger = AuditLedger::new(
            Arc::new(InMemoryAuditRepository::new()),
            Arc::new(InMemoryArchive::new()),
            PrivacyHasher::new(hash_secret),
            Arc::new(LocalKms::ephemeral()),
            config.audit.clone(),
        );
        Self::new(config, Arc::new(InMemoryStateStore::new()), ledger)
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// The configured retry policy. Only errors whose recovery strategy is
    /// RETRY are retried.
    pub fn retry_policy(&self) -> RetryPolicy<ServiceError> {
        RetryPolicy::from_settings(&self.retry)
            .retry_if(|e: &ServiceError| e.recovery_strategy() == RecoveryStrategy::Retry)
    }

    /// Outward body for `error`, with technical details when detailed
    /// logging is enabled.
    pub fn outward(&self, error: &UnifiedError) -> OutwardError {
        error.to_outward(self.detailed_errors)
    }

    /// Call `ctx.service` through its breaker with the configured retry
    /// policy. `audit` is written on success; on failure a `service_error`
    /// event referencing it is written instead.
    pub async fn guarded_call<T, F, Fut>(
        &self,
        ctx: &ErrorContext,
        audit: Option<AuditEventInput>,
        call: F,
    ) -> Result<T, UnifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let policy = self.retry_policy();
        self.guarded_call_with(ctx, &policy, audit, call).await
    }

    pub async fn guarded_call_with<T, F, Fut>(
        &self,
        ctx: &ErrorContext,
        policy: &RetryPolicy<ServiceError>,
        audit: Option<AuditEventInput>,
        mut call: F,
    ) -> Result<T, UnifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let dependency = ctx.service.as_str();
        let registry = &self.registry;
        let outcome = RetryCoordinator::labeled(format!("{}.{}", ctx.service, ctx.operation))
            .execute_with_stats(
                || {
                    let fut = call();
                    async move {
                        registry
                            .execute(dependency, move || fut)
                            .await
                            .map_err(|e| ServiceError::from_call(e, dependency))
                    }
                },
                policy,
            )
            .await;

        match outcome.result {
            Ok(value) => {
                if outcome.attempts > 1 {
                    debug!(
                        service = %ctx.service,
                        operation = %ctx.operation,
                        attempts = outcome.attempts,
                        "guarded call recovered"
                    );
                }
                if let Some(input) = audit {
                    self.ledger.submit(input).await;
                }
                Ok(value)
            }
            Err(error) => {
                let unified = self.classifier.create_unified_error(&error, ctx);
                warn!(
                    service = %ctx.service,
                    operation = %ctx.operation,
                    code = %unified.error_code.as_str(),
                    correlation_id = %unified.correlation_id,
                    attempts = outcome.attempts,
                    "guarded call failed"
                );
                let event = failure_event(ctx, &unified, outcome.attempts, audit.as_ref());
                self.ledger.submit(event).await;
                Err(unified)
            }
        }
    }
}

/// Audit record of a failed guarded call. Carries the classification and
/// the business event's type, never the raw error text.
fn failure_event(
    ctx: &ErrorContext,
    error: &UnifiedError,
    attempts: u32,
    business: Option<&AuditEventInput>,
) -> AuditEventInput {
    let classification = &error.classification;
    let details = json!({
        "service": ctx.service,
        "operation": ctx.operation,
        "category": classification.category.as_str(),
        "recovery_strategy": classification.recovery_strategy.as_str(),
        "error_code": error.error_code.as_str(),
        "correlation_id": error.correlation_id.as_str(),
        "attempts": attempts,
        "business_event": business.map(|b| json!({
            "type": b.event_type,
            "subtype": b.event_subtype,
        })),
    });

    let mut input = AuditEventInput::new(
        "service_error",
        error.error_code.as_str().to_ascii_lowercase(),
    )
    .details(details)
    .lawful_basis(LawfulBasis::LegitimateInterests)
    .classification(DataClassification::Internal);

    match business {
        Some(b) => {
            input.user_id = b.user_id.clone();
            input.session_id = b.session_id.clone();
            input.source_ip = b.source_ip.clone();
            input.user_agent = b.user_agent.clone();
            input.lawful_basis = b.lawful_basis;
            input.classification = b.classification;
        }
        None => input.user_id = ctx.user_id.clone(),
    }
    input
}
