use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_store::{StateStore, StoreError, StoreResult};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::error::{CallError, FailureKind};
use crate::state::{Admission, BreakerState, CircuitState, Transition};

/// Point-in-time view of a breaker for dashboards and health checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Successes over outcomes in the sliding window.
    pub success_rate: Option<f64>,
    pub window_size: usize,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub retry_after_ms: Option<u64>,
}

impl BreakerMetrics {
    fn from_state(dependency: &str, state: &BreakerState, now: u64) -> Self {
        Self {
            dependency: dependency.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            success_rate: state.success_rate(),
            window_size: state.window.len(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            retry_after_ms: state.retry_after(now).map(|d| d.as_millis() as u64),
        }
    }
}

/// Handle to the breaker for one dependency.
///
/// Holds no state of its own: every decision loads, transitions, and stores
/// the shared [`BreakerState`] through the `StateStore`, so any number of
/// handles (in any number of processes) act as one breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker. Errors for which
    /// [`FailureKind::is_expected`] holds pass through without counting.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CallError<E>>
    where
        E: FailureKind,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(op, |e: &E| e.is_expected()).await
    }

    /// Like [`execute`](Self::execute) with an explicit predicate for
    /// expected errors.
    pub async fn execute_with<T, E, F, Fut, P>(&self, op: F, is_expected: P) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let probe = match self.admit().await {
            Admission::Admitted { probe } => probe,
            Admission::Rejected {
                failure_count,
                last_failure_at,
                retry_after,
            } => {
                metrics::counter!("tessera_breaker_rejections_total", "dependency" => self.name.clone())
                    .increment(1);
                debug!(dependency = %self.name, ?retry_after, "call rejected by open circuit");
                return Err(CallError::Open {
                    dependency: self.name.clone(),
                    failure_count,
                    last_failure_time: last_failure_at,
                    retry_after,
                });
            }
        };

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.record(true, probe).await;
                Ok(value)
            }
            Ok(Err(e)) if is_expected(&e) => {
                if probe {
                    self.modify(|s| {
                        s.release_probe();
                        ((), None)
                    })
                    .await;
                }
                Err(CallError::Operation(e))
            }
            Ok(Err(e)) => {
                self.record(false, probe).await;
                Err(CallError::Operation(e))
            }
            Err(_) => {
                warn!(dependency = %self.name, ?timeout, "call timed out");
                self.record(false, probe).await;
                Err(CallError::Timeout { timeout })
            }
        }
    }

    /// Record an outcome observed outside `execute`, e.g. by the error
    /// classifier. Never holds a probe lease.
    pub fn report_outcome(&self, success: bool) {
        let now = self.clock.now_ms();
        let result = self.try_modify(|s| ((), apply_outcome(s, now, success, false)));
        if let Err(e) = result {
            warn!(dependency = %self.name, error = %e, "failed to update breaker state");
        }
    }

    pub fn metrics(&self) -> StoreResult<BreakerMetrics> {
        let state = self.load()?;
        Ok(BreakerMetrics::from_state(&self.name, &state, self.clock.now_ms()))
    }

    pub fn state(&self) -> StoreResult<CircuitState> {
        Ok(self.load()?.state)
    }

    /// Open the circuit immediately, as if it had just failed.
    pub fn force_open(&self) -> StoreResult<()> {
        let now = self.clock.now_ms();
        self.try_modify(|s| ((), s.force_open(now))).map(drop)
    }

    /// Close the circuit and clear its history.
    pub fn reset(&self) -> StoreResult<()> {
        self.try_modify(|s| ((), s.reset())).map(drop)
    }

    async fn admit(&self) -> Admission {
        let now = self.clock.now_ms();
        match self.modify_blocking(move |s| s.admit(now)).await {
            Ok(Some(admission)) => admission,
            Ok(None) => Admission::Admitted { probe: false },
            Err(e) => {
                // Breaker bookkeeping must not take the dependency down with it.
                warn!(dependency = %self.name, error = %e, "breaker state unavailable; admitting call");
                Admission::Admitted { probe: false }
            }
        }
    }

    async fn record(&self, success: bool, probe: bool) {
        let now = self.clock.now_ms();
        self.modify(move |s| ((), apply_outcome(s, now, success, probe)))
            .await;
    }

    async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut BreakerState) -> ((), Option<Transition>) + Send + 'static,
    {
        if let Err(e) = self.modify_blocking(f).await {
            warn!(dependency = %self.name, error = %e, "failed to update breaker state");
        }
    }

    /// [`try_modify`](Self::try_modify) on the blocking pool, bounded by the
    /// call timeout. Backends may block on file locks.
    async fn modify_blocking<R, F>(&self, f: F) -> StoreResult<Option<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut BreakerState) -> (R, Option<Transition>) + Send + 'static,
    {
        let this = self.clone();
        let budget = self.config.call_timeout();
        let task = tokio::task::spawn_blocking(move || this.try_modify(f));
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Task(e.to_string())),
            Err(_) => Err(StoreError::Timeout(budget)),
        }
    }

    /// Atomic read-modify-write of the shared state. Returns what `f`
    /// produced, or `None` if the store never invoked it.
    fn try_modify<R, F>(&self, f: F) -> StoreResult<Option<R>>
    where
        F: FnOnce(&mut BreakerState) -> (R, Option<Transition>),
    {
        let mut f = Some(f);
        let mut output = None;
        let mut transition = None;
        self.store.update(&self.name, &mut |current| {
            let mut state = self.decode(current);
            state.config = self.config;
            if let Some(f) = f.take() {
                let (out, t) = f(&mut state);
                output = Some(out);
                transition = t;
            }
            serde_json::to_vec(&state)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string()))
        })?;
        if let Some(t) = transition {
            self.on_transition(t);
        }
        Ok(output)
    }

    fn load(&self) -> StoreResult<BreakerState> {
        let bytes = self.store.load(&self.name)?;
        Ok(self.decode(bytes.as_deref()))
    }

    fn decode(&self, bytes: Option<&[u8]>) -> BreakerState {
        match bytes.map(serde_json::from_slice::<BreakerState>) {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                warn!(dependency = %self.name, error = %e, "discarding unreadable breaker state");
                BreakerState::new(self.config)
            }
            None => BreakerState::new(self.config),
        }
    }

    fn on_transition(&self, t: Transition) {
        info!(
            dependency = %self.name,
            from = %t.from,
            to = %t.to,
            "circuit breaker transition"
        );
        metrics::counter!(
            "tessera_breaker_transitions_total",
            "dependency" => self.name.clone(),
            "to" => t.to.as_str()
        )
        .increment(1);
    }
}

fn apply_outcome(s: &mut BreakerState, now: u64, success: bool, probe: bool) -> Option<Transition> {
    if success {
        s.record_success(now, probe)
    } else {
        s.record_failure(now, probe)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tessera_store::{FileStateStore, InMemoryStateStore};

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    enum TestError {
        Down,
        BadInput,
    }

    impl FailureKind for TestError {
        fn is_expected(&self) -> bool {
            matches!(self, TestError::BadInput)
        }
    }

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "s3",
            BreakerConfig {
                failure_threshold: 5,
                recovery_timeout_ms: 30_000,
                monitoring_window_ms: 60_000,
                successes_to_close: 3,
                call_timeout_ms: 1_000,
            },
            Arc::new(InMemoryStateStore::new()),
            clock,
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CallError<TestError>> {
        b.execute(|| async { Err::<(), _>(TestError::Down) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_skips_operation() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let b = breaker(clock.clone());
        for _ in 0..5 {
            assert!(matches!(fail(&b).await, Err(CallError::Operation(TestError::Down))));
        }
        assert_eq!(b.state().unwrap(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result: Result<(), CallError<TestError>> = b
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match result {
            Err(CallError::Open { failure_count, .. }) => assert_eq!(failure_count, 5),
            other => panic!("expected open rejection, got {other:?}"),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let b = breaker(clock.clone());
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));

        let invoked = AtomicU32::new(0);
        for _ in 0..3 {
            let r: Result<(), CallError<TestError>> = b
                .execute(|| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(r.is_ok());
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        let m = b.metrics().unwrap();
        assert_eq!(m.state, CircuitState::Closed);
        assert_eq!(m.failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let b = breaker(clock.clone());
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(30));
        assert!(matches!(fail(&b).await, Err(CallError::Operation(_))));
        assert_eq!(b.state().unwrap(), CircuitState::Open);
        assert!(matches!(fail(&b).await, Err(CallError::Open { .. })));
    }

    #[tokio::test]
    async fn expected_errors_do_not_count() {
        let clock = Arc::new(ManualClock::new(0));
        let b = breaker(clock);
        for _ in 0..10 {
            let r: Result<(), _> = b.execute(|| async { Err(TestError::BadInput) }).await;
            assert!(matches!(r, Err(CallError::Operation(TestError::BadInput))));
        }
        let m = b.metrics().unwrap();
        assert_eq!(m.state, CircuitState::Closed);
        assert_eq!(m.failure_count, 0);
        assert_eq!(m.window_size, 0);
    }

    #[tokio::test]
    async fn expected_error_releases_probe() {
        let clock = Arc::new(ManualClock::new(0));
        let b = breaker(clock.clone());
        b.force_open().unwrap();
        clock.advance(Duration::from_secs(30));
        let r: Result<(), _> = b.execute(|| async { Err(TestError::BadInput) }).await;
        assert!(r.is_err());
        // Lease released: the next caller is admitted at once.
        let r: Result<(), CallError<TestError>> = b.execute(|| async { Ok(()) }).await;
        assert!(r.is_ok());
        assert_eq!(b.state().unwrap(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let clock = Arc::new(ManualClock::new(0));
        let b = breaker(clock);
        let r: Result<(), CallError<TestError>> = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            r,
            Err(CallError::Timeout { timeout }) if timeout == Duration::from_secs(1)
        ));
        assert_eq!(b.metrics().unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn handles_share_state_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let make = || {
            CircuitBreaker::new(
                "bedrock",
                BreakerConfig {
                    failure_threshold: 2,
                    ..BreakerConfig::default()
                },
                Arc::new(FileStateStore::open(dir.path()).unwrap()),
                clock.clone(),
            )
        };
        let (a, b) = (make(), make());
        let _ = fail(&a).await;
        let _ = fail(&b).await;
        assert_eq!(a.state().unwrap(), CircuitState::Open);
        assert_eq!(b.state().unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn held_store_lock_does_not_stall_the_executor() {
        let dir = tempfile::tempdir().unwrap();
        let holder = FileStateStore::open(dir.path()).unwrap();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let held = std::thread::spawn(move || {
            holder
                .update("s3", &mut |current| {
                    locked_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_secs(2));
                    Ok(current.map(<[u8]>::to_vec))
                })
                .unwrap();
        });
        locked_rx.recv().unwrap();

        let b = CircuitBreaker::new(
            "s3",
            BreakerConfig {
                call_timeout_ms: 100,
                ..BreakerConfig::default()
            },
            Arc::new(FileStateStore::open(dir.path()).unwrap()),
            Arc::new(ManualClock::new(0)),
        );
        let started = std::time::Instant::now();
        let r: Result<u32, CallError<TestError>> = tokio::time::timeout(
            Duration::from_millis(1_000),
            b.execute(|| async { Ok(7) }),
        )
        .await
        .expect("execute must not wait for the lock holder");
        assert_eq!(r.unwrap(), 7);
        assert!(started.elapsed() < Duration::from_millis(1_000));
        held.join().unwrap();
    }

    #[test]
    fn corrupt_state_is_replaced() {
        let store = Arc::new(InMemoryStateStore::new());
        store.update("s3", &mut |_| Ok(Some(b"not json".to_vec()))).unwrap();
        let b = CircuitBreaker::new(
            "s3",
            BreakerConfig::default(),
            store,
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(b.state().unwrap(), CircuitState::Closed);
        b.force_open().unwrap();
        assert_eq!(b.state().unwrap(), CircuitState::Open);
        b.reset().unwrap();
        assert_eq!(b.state().unwrap(), CircuitState::Closed);
    }
}
