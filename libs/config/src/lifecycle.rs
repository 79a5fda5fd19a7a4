//! Connection lifecycle policy
//!
//! Defaults are identical across platforms except for the handshake timeout,
//! which reflects how slow each platform's bring-up is in practice.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use types::Platform;

/// Handshake timeout for platforms without a slow bring-up step
pub const GENERIC_OPEN_TIMEOUT_MS: u64 = 15_000;
/// TikTok negotiates a signed websocket URL before connecting
pub const TIKTOK_OPEN_TIMEOUT_MS: u64 = 30_000;
/// Kick drives a local browser to get past its edge protection
pub const KICK_OPEN_TIMEOUT_MS: u64 = 120_000;

/// Default handshake timeout for `platform`
pub fn default_open_timeout_ms(platform: Platform) -> u64 {
    match platform {
        Platform::TikTok => TIKTOK_OPEN_TIMEOUT_MS,
        Platform::Kick => KICK_OPEN_TIMEOUT_MS,
        Platform::Twitch | Platform::YouTube => GENERIC_OPEN_TIMEOUT_MS,
    }
}

/// Retry and stability policy for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any reconnect delay
    pub max_delay_ms: u64,
    /// Reconnect attempts allowed before giving up
    pub max_attempts: u32,
    /// Uptime after which the retry budget resets
    pub stable_confirm_ms: u64,
    /// Uptime below which a drop counts as a failed bring-up
    pub min_stable_ms: u64,
    /// Handshake timeout; `None` uses the platform default
    pub open_timeout_ms: Option<u64>,
    /// Upper bound on adapter teardown
    pub close_timeout_ms: u64,
    /// Capacity of the per-connection event channel
    pub event_buffer: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            stable_confirm_ms: 10_000,
            min_stable_ms: 3_000,
            open_timeout_ms: None,
            close_timeout_ms: 5_000,
            event_buffer: 1_024,
        }
    }
}

impl LifecycleSettings {
    /// Defaults with the platform's handshake timeout filled in
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            open_timeout_ms: Some(default_open_timeout_ms(platform)),
            ..Self::default()
        }
    }

    /// First reconnect delay
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Reconnect delay ceiling
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Handshake timeout for `platform`
    pub fn open_timeout(&self, platform: Platform) -> Duration {
        Duration::from_millis(
            self.open_timeout_ms
                .unwrap_or_else(|| default_open_timeout_ms(platform)),
        )
    }

    /// Adapter teardown timeout
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Reject settings the lifecycle manager cannot run with
    pub fn validate(&self, platform: Platform) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("{}: max_attempts must be greater than 0", platform);
        }
        if self.initial_delay_ms == 0 {
            bail!("{}: initial_delay_ms must be greater than 0", platform);
        }
        if self.initial_delay_ms > self.max_delay_ms {
            bail!(
                "{}: initial_delay_ms ({}) exceeds max_delay_ms ({})",
                platform,
                self.initial_delay_ms,
                self.max_delay_ms
            );
        }
        if self.min_stable_ms > self.stable_confirm_ms {
            bail!(
                "{}: min_stable_ms ({}) exceeds stable_confirm_ms ({})",
                platform,
                self.min_stable_ms,
                self.stable_confirm_ms
            );
        }
        if self.open_timeout_ms == Some(0) || self.close_timeout_ms == 0 {
            bail!("{}: timeouts must be greater than 0", platform);
        }
        if self.event_buffer == 0 {
            bail!("{}: event_buffer must be greater than 0", platform);
        }
        Ok(())
    }
}
