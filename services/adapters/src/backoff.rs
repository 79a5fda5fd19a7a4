//! Exponential reconnect backoff
//!
//! Pure delay computation: `initial * 2^attempt`, capped at `max`. Jitter is
//! left out on purpose to keep the established retry timing, even though many
//! sessions dropped by the same platform outage will retry in lockstep.

use chatmux_config::LifecycleSettings;
use std::time::Duration;

/// Delay before reconnect attempt number `attempt_count + 1`
///
/// Saturates instead of overflowing for very large attempt counts.
pub fn next_delay(attempt_count: u32, initial: Duration, max: Duration) -> Duration {
    let initial_ms = initial.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;

    let factor = 1u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
    let backoff_ms = initial_ms.saturating_mul(factor);

    Duration::from_millis(backoff_ms.min(max_ms))
}

/// Backoff bounds for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Create a policy from explicit bounds
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Policy using the configured bounds
    pub fn from_settings(settings: &LifecycleSettings) -> Self {
        Self::new(settings.initial_delay(), settings.max_delay())
    }

    /// Delay for the given number of attempts already made
    pub fn next(&self, attempt_count: u32) -> Duration {
        next_delay(attempt_count, self.initial, self.max)
    }

    /// Delay a fresh connection starts from
    pub fn initial(&self) -> Duration {
        self.initial
    }
}
