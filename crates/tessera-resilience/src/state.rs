//! Breaker state machine.
//!
//! Pure transitions over [`BreakerState`]; no I/O and no clock. The
//! [`CircuitBreaker`](crate::CircuitBreaker) handle runs these inside a
//! `StateStore::update` so every transition is an atomic read-modify-write.
//!
//! ```text
//! CLOSED    --failure_threshold consecutive failures-->  OPEN
//! OPEN      --recovery_timeout elapsed, next call-->     HALF_OPEN
//! HALF_OPEN --successes_to_close probe successes-->      CLOSED
//! HALF_OPEN --any failure-->                             OPEN
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;

/// Capacity of the sliding outcome window.
pub const WINDOW_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub at_ms: u64,
    pub success: bool,
}

/// Persisted state of one breaker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    /// Config in force at the last update.
    pub config: BreakerConfig,
    pub window: VecDeque<Outcome>,
    /// While set and in the future, a half-open probe is in flight.
    pub probe_lease_until: Option<u64>,
}

/// Result of asking the breaker to let a call through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        /// The call holds the half-open probe lease.
        probe: bool,
    },
    Rejected {
        failure_count: u32,
        last_failure_at: Option<u64>,
        retry_after: Duration,
    },
}

/// A state change, reported so callers can log and count it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl BreakerState {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            config,
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            probe_lease_until: None,
        }
    }

    /// Decide whether a call may proceed at `now`. Moves OPEN to HALF_OPEN
    /// once the recovery timeout has elapsed.
    pub fn admit(&mut self, now: u64) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Admitted { probe: false }, None),
            CircuitState::Open => {
                let opened_at = self.last_failure_at.unwrap_or(0);
                let elapsed = now.saturating_sub(opened_at);
                let recovery = self.config.recovery_timeout_ms;
                if elapsed >= recovery {
                    let t = self.move_to(CircuitState::HalfOpen);
                    self.success_count = 0;
                    self.take_probe(now);
                    (Admission::Admitted { probe: true }, t)
                } else {
                    (self.rejection(Duration::from_millis(recovery - elapsed)), None)
                }
            }
            CircuitState::HalfOpen => match self.probe_lease_until {
                Some(until) if now < until => {
                    (self.rejection(Duration::from_millis(until - now)), None)
                }
                _ => {
                    self.take_probe(now);
                    (Admission::Admitted { probe: true }, None)
                }
            },
        }
    }

    pub fn record_success(&mut self, now: u64, probe: bool) -> Option<Transition> {
        self.push_outcome(now, true);
        self.last_success_at = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen if probe => {
                self.probe_lease_until = None;
                self.success_count += 1;
                if self.success_count >= self.config.successes_to_close {
                    Some(self.close())
                } else {
                    None
                }
            }
            // Outcomes of calls admitted before the last transition.
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    pub fn record_failure(&mut self, now: u64, probe: bool) -> Option<Transition> {
        self.push_outcome(now, false);
        match self.state {
            CircuitState::Closed => {
                self.last_failure_at = Some(now);
                self.failure_count = self.recent_consecutive_failures(now);
                if self.failure_count >= self.config.failure_threshold {
                    self.move_to(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if probe {
                    self.probe_lease_until = None;
                }
                self.last_failure_at = Some(now);
                self.failure_count = self.failure_count.saturating_add(1);
                self.success_count = 0;
                self.move_to(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Give back a probe lease without recording an outcome.
    pub fn release_probe(&mut self) {
        self.probe_lease_until = None;
    }

    pub fn force_open(&mut self, now: u64) -> Option<Transition> {
        self.last_failure_at = Some(now);
        self.probe_lease_until = None;
        self.success_count = 0;
        self.move_to(CircuitState::Open)
    }

    /// Back to CLOSED with counters and window cleared.
    pub fn reset(&mut self) -> Option<Transition> {
        let t = self.close();
        self.window.clear();
        self.last_failure_at = None;
        self.last_success_at = None;
        (t.from != t.to).then_some(t)
    }

    /// Fraction of successes in the window, `None` when it is empty.
    pub fn success_rate(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let ok = self.window.iter().filter(|o| o.success).count();
        Some(ok as f64 / self.window.len() as f64)
    }

    /// Time until an open breaker will admit a probe.
    pub fn retry_after(&self, now: u64) -> Option<Duration> {
        match self.state {
            CircuitState::Open => {
                let reopen = self
                    .last_failure_at
                    .unwrap_or(0)
                    .saturating_add(self.config.recovery_timeout_ms);
                Some(Duration::from_millis(reopen.saturating_sub(now)))
            }
            _ => None,
        }
    }

    fn rejection(&self, retry_after: Duration) -> Admission {
        Admission::Rejected {
            failure_count: self.failure_count,
            last_failure_at: self.last_failure_at,
            retry_after,
        }
    }

    fn take_probe(&mut self, now: u64) {
        self.probe_lease_until = Some(now.saturating_add(self.config.call_timeout_ms));
    }

    fn close(&mut self) -> Transition {
        let from = self.state;
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_lease_until = None;
        Transition {
            from,
            to: CircuitState::Closed,
        }
    }

    fn move_to(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }

    fn push_outcome(&mut self, now: u64, success: bool) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(Outcome { at_ms: now, success });
    }

    /// Failures at the tail of the window that fall inside the monitoring window.
    fn recent_consecutive_failures(&self, now: u64) -> u32 {
        let cutoff = now.saturating_sub(self.config.monitoring_window_ms);
        self.window
            .iter()
            .rev()
            .take_while(|o| !o.success && o.at_ms >= cutoff)
            .count() as u32
    }
}
