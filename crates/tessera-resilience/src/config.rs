use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds and timings for one circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe.
    pub recovery_timeout_ms: u64,
    /// Failures older than this are forgotten while closed.
    pub monitoring_window_ms: u64,
    /// Probe successes required to close from half-open.
    pub successes_to_close: u32,
    /// Upper bound on every wrapped call.
    pub call_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
            successes_to_close: 3,
            call_timeout_ms: 30_000,
        }
    }
}

/// Serializable retry defaults, turned into a [`RetryPolicy`](crate::RetryPolicy)
/// at each call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}
