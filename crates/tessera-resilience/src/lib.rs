//! Resilience primitives for calls to unreliable dependencies.
//!
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`]: per-dependency breakers
//!   whose state lives in a shared [`StateStore`](tessera_store::StateStore),
//!   so every process instance sees the same circuit.
//! - [`RetryCoordinator`]: bounded retries with exponential backoff and
//!   multiplicative jitter in `[0.5, 1.0]`. Circuit-open rejections are never
//!   retried.
//! - [`Clock`]: wall-clock source, swappable for tests.
//!
//! Composition at a call site is breaker inside retry:
//!
//! ```text
//! retry.execute_with_retry(|| registry.execute("s3", || get_object()), &policy)
//! ```

pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;
pub mod state;

pub use backoff::{backoff_delay, capped_delay, jittered_backoff};
pub use breaker::{BreakerMetrics, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerConfig, RetrySettings};
pub use error::{CallError, FailureKind, RetrySignal};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryCoordinator, RetryOutcome, RetryPolicy};
pub use state::{Admission, BreakerState, CircuitState, Transition, WINDOW_CAPACITY};
