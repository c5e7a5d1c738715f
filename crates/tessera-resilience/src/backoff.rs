//! Exponential backoff with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.5;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.0;

/// Delay before retry number `attempt` (1-based) with no jitter applied:
/// `min(max, base * 2^(attempt-1))`. Attempt 0 waits nothing.
pub fn capped_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(max)
}

/// `capped_delay` scaled by `jitter`, which is clamped to `[0.5, 1.0]`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(JITTER_MIN, JITTER_MAX);
    capped_delay(attempt, base, max).mul_f64(jitter)
}

/// `backoff_delay` with jitter drawn uniformly from `[0.5, 1.0]`.
pub fn jittered_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
    backoff_delay(attempt, base, max, jitter)
}
