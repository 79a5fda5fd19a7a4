//! Stability window
//!
//! Classifies a drop by how long the connection had been up. Only drops of a
//! connection that survived the minimum stable uptime are worth retrying; a
//! connection that dies right after coming up will almost always die again.

use crate::rate_limit::RateLimitDetector;
use chatmux_config::LifecycleSettings;
use std::time::Duration;
use types::FailureClassification;

/// Uptime thresholds for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityWindow {
    /// Uptime after which the retry budget resets
    pub stable_confirm: Duration,
    /// Uptime below which a drop counts as unstable
    pub min_stable: Duration,
}

impl StabilityWindow {
    /// Window using the configured thresholds
    pub fn from_settings(settings: &LifecycleSettings) -> Self {
        Self {
            stable_confirm: Duration::from_millis(settings.stable_confirm_ms),
            min_stable: Duration::from_millis(settings.min_stable_ms),
        }
    }

    /// Classify a drop by uptime alone
    ///
    /// `connected_at_ms` is `None` when the connection never came up.
    pub fn classify(&self, connected_at_ms: Option<u64>, now_ms: u64) -> FailureClassification {
        match connected_at_ms {
            None => FailureClassification::DuringBringUp,
            Some(connected_at) => {
                let uptime = now_ms.saturating_sub(connected_at);
                if uptime < self.min_stable.as_millis() as u64 {
                    FailureClassification::UnstableEarlyDrop
                } else {
                    FailureClassification::StableThenLost
                }
            }
        }
    }

    /// Whether the connection has been up long enough to reset the retry budget
    pub fn is_confirmed(&self, connected_at_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(connected_at_ms) >= self.stable_confirm.as_millis() as u64
    }

    /// Classify a drop, letting a rate-limit reason override the uptime rule
    pub fn classify_failure(
        &self,
        connected_at_ms: Option<u64>,
        now_ms: u64,
        reason: &str,
        detector: Option<&dyn RateLimitDetector>,
    ) -> FailureClassification {
        if detector.is_some_and(|d| d.is_rate_limited(reason)) {
            return FailureClassification::RateLimited;
        }
        self.classify(connected_at_ms, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::SubstringDetector;

    fn window() -> StabilityWindow {
        StabilityWindow::from_settings(&LifecycleSettings::default())
    }

    #[test]
    fn classifies_by_uptime() {
        let w = window();
        assert_eq!(w.classify(None, 5_000), FailureClassification::DuringBringUp);
        assert_eq!(w.classify(Some(1_000), 2_500), FailureClassification::UnstableEarlyDrop);
        assert_eq!(w.classify(Some(1_000), 3_999), FailureClassification::UnstableEarlyDrop);
        assert_eq!(w.classify(Some(1_000), 4_000), FailureClassification::StableThenLost);
        assert_eq!(w.classify(Some(0), 15_000), FailureClassification::StableThenLost);
    }

    #[test]
    fn clock_skew_reads_as_zero_uptime() {
        assert_eq!(
            window().classify(Some(10_000), 9_000),
            FailureClassification::UnstableEarlyDrop
        );
    }

    #[test]
    fn rate_limit_overrides_uptime() {
        let detector = SubstringDetector::new(["rate limit"]);
        let w = window();

        assert_eq!(
            w.classify_failure(Some(0), 60_000, "Rate limit hit", Some(&detector)),
            FailureClassification::RateLimited
        );
        assert_eq!(
            w.classify_failure(Some(0), 60_000, "Rate limit hit", None),
            FailureClassification::StableThenLost
        );
    }

    #[test]
    fn confirmation_threshold() {
        let w = window();
        assert!(!w.is_confirmed(0, 9_999));
        assert!(w.is_confirmed(0, 10_000));
    }
}
