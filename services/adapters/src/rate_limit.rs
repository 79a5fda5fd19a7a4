//! Rate-limit detection on disconnect reasons
//!
//! Platforms rarely report throttling with a structured code, so detection is
//! a case-insensitive substring match over the reason text.

use chatmux_config::FallbackSettings;

/// Decides whether a disconnect reason means the platform is throttling us
pub trait RateLimitDetector: Send + Sync {
    /// True if `reason` indicates rate limiting
    fn is_rate_limited(&self, reason: &str) -> bool;
}

impl<F> RateLimitDetector for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_rate_limited(&self, reason: &str) -> bool {
        self(reason)
    }
}

/// Case-insensitive substring detector
#[derive(Debug, Clone)]
pub struct SubstringDetector {
    indicators: Vec<String>,
}

impl SubstringDetector {
    /// Create a detector; indicators are lowercased
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Detector using the configured fallback indicators
    pub fn from_settings(settings: &FallbackSettings) -> Self {
        Self::new(settings.indicators())
    }

    /// Indicators this detector matches
    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }
}

impl RateLimitDetector for SubstringDetector {
    fn is_rate_limited(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.indicators
            .iter()
            .any(|indicator| reason.contains(indicator.as_str()))
    }
}
