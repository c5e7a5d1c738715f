use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tessera_store::{StateStore, StoreResult};
use tracing::warn;

use crate::breaker::{BreakerMetrics, CircuitBreaker};
use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{CallError, FailureKind};
use crate::state::CircuitState;

/// All breakers of a process, keyed by dependency name and backed by one
/// `StateStore`.
///
/// This is the single place breaker state is read and written: dependency
/// call sites go through [`execute`](Self::execute), and the error classifier
/// feeds observed outcomes in through [`report_outcome`](Self::report_outcome).
pub struct CircuitBreakerRegistry {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<dyn StateStore>, defaults: BreakerConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            defaults,
            overrides: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `config` instead of the defaults for `dependency`.
    pub fn with_override(mut self, dependency: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(dependency.into(), config);
        self
    }

    pub fn config_for(&self, dependency: &str) -> BreakerConfig {
        self.overrides
            .get(dependency)
            .copied()
            .unwrap_or(self.defaults)
    }

    /// Handle to the breaker for `dependency`. Created lazily in the store on
    /// its first call.
    pub fn breaker(&self, dependency: &str) -> CircuitBreaker {
        CircuitBreaker::new(
            dependency,
            self.config_for(dependency),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        )
    }

    pub async fn execute<T, E, F, Fut>(&self, dependency: &str, op: F) -> Result<T, CallError<E>>
    where
        E: FailureKind,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(dependency).execute(op).await
    }

    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        dependency: &str,
        op: F,
        is_expected: P,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.breaker(dependency).execute_with(op, is_expected).await
    }

    pub fn report_outcome(&self, dependency: &str, success: bool) {
        self.breaker(dependency).report_outcome(success);
    }

    pub fn metrics(&self, dependency: &str) -> StoreResult<BreakerMetrics> {
        self.breaker(dependency).metrics()
    }

    /// Metrics for every breaker that has state in the store, sorted by name.
    pub fn all_metrics(&self) -> StoreResult<Vec<BreakerMetrics>> {
        let mut out = Vec::new();
        for key in self.store.keys()? {
            match self.metrics(&key) {
                Ok(m) => out.push(m),
                Err(e) => warn!(dependency = %key, error = %e, "skipping unreadable breaker"),
            }
        }
        Ok(out)
    }

    pub fn status(&self, dependency: &str) -> StoreResult<CircuitState> {
        self.breaker(dependency).state()
    }

    pub fn reset(&self, dependency: &str) -> StoreResult<()> {
        self.breaker(dependency).reset()
    }

    pub fn force_open(&self, dependency: &str) -> StoreResult<()> {
        self.breaker(dependency).force_open()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
