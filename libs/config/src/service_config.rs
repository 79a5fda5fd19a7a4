//! Service Configuration Module
//!
//! Loads chatmux configuration from an optional TOML file with `CHATMUX_*`
//! environment overrides layered on top. Every field has a default, so an
//! empty configuration is valid.

use crate::lifecycle::LifecycleSettings;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use types::Platform;

/// Environment variable prefix, e.g. `CHATMUX_PLATFORMS__TIKTOK__MAX_ATTEMPTS=8`
pub const ENV_PREFIX: &str = "CHATMUX";

/// Rate-limit indicators shared by every platform vendor
const BASE_RATE_LIMIT_INDICATORS: [&str; 5] = [
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "request limit",
];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatmuxConfig {
    /// Lifecycle policy per platform
    pub platforms: PlatformTable,

    /// TikTok rate-limit fallback
    pub fallback: FallbackSettings,

    /// Kick adapter settings
    pub kick: KickSettings,

    /// Twitch client settings
    pub twitch: TwitchSettings,
}

/// Lifecycle settings keyed by platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformTable {
    pub tiktok: LifecycleSettings,
    pub twitch: LifecycleSettings,
    pub kick: LifecycleSettings,
    pub youtube: LifecycleSettings,
}

impl Default for PlatformTable {
    fn default() -> Self {
        Self {
            tiktok: LifecycleSettings::for_platform(Platform::TikTok),
            twitch: LifecycleSettings::for_platform(Platform::Twitch),
            kick: LifecycleSettings::for_platform(Platform::Kick),
            youtube: LifecycleSettings::for_platform(Platform::YouTube),
        }
    }
}

impl PlatformTable {
    /// Settings for `platform`
    pub fn get(&self, platform: Platform) -> &LifecycleSettings {
        match platform {
            Platform::TikTok => &self.tiktok,
            Platform::Twitch => &self.twitch,
            Platform::Kick => &self.kick,
            Platform::YouTube => &self.youtube,
        }
    }

    /// Mutable settings for `platform`
    pub fn get_mut(&mut self, platform: Platform) -> &mut LifecycleSettings {
        match platform {
            Platform::TikTok => &mut self.tiktok,
            Platform::Twitch => &mut self.twitch,
            Platform::Kick => &mut self.kick,
            Platform::YouTube => &mut self.youtube,
        }
    }
}

/// Rate-limit fallback policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Switch to the secondary source when the primary is rate limited
    pub enabled: bool,
    /// Vendor name used for the "<vendor> blocked" indicator
    pub vendor_name: String,
    /// Additional case-insensitive indicator substrings
    pub extra_indicators: Vec<String>,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            vendor_name: "tiktok".to_string(),
            extra_indicators: Vec::new(),
        }
    }
}

impl FallbackSettings {
    /// Every indicator substring, lowercased
    pub fn indicators(&self) -> Vec<String> {
        let mut indicators: Vec<String> = BASE_RATE_LIMIT_INDICATORS
            .iter()
            .map(|s| s.to_string())
            .collect();
        if !self.vendor_name.trim().is_empty() {
            indicators.push(format!("{} blocked", self.vendor_name.trim().to_lowercase()));
        }
        indicators.extend(
            self.extra_indicators
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        );
        indicators
    }
}

/// Kick adapter settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickSettings {
    /// Browser binary used for the automation step; PATH is searched when unset
    pub browser_path: Option<PathBuf>,
}

/// Twitch client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchSettings {
    /// IRC-over-WebSocket endpoint
    pub websocket_url: String,
}

impl Default for TwitchSettings {
    fn default() -> Self {
        Self {
            websocket_url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
        }
    }
}

impl ChatmuxConfig {
    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading chatmux config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        } else {
            debug!("No config file given, using defaults plus environment");
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        let parsed: ChatmuxConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Lifecycle settings for `platform`
    pub fn lifecycle(&self, platform: Platform) -> &LifecycleSettings {
        self.platforms.get(platform)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        for platform in Platform::ALL {
            self.platforms.get(platform).validate(platform)?;
        }
        if self.twitch.websocket_url.is_empty() {
            anyhow::bail!("twitch.websocket_url cannot be empty");
        }
        if !self.twitch.websocket_url.starts_with("ws://")
            && !self.twitch.websocket_url.starts_with("wss://")
        {
            anyhow::bail!("twitch.websocket_url must start with ws:// or wss://");
        }
        Ok(())
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Convenience function to load configuration with the default prefix
pub fn load_config(path: Option<&Path>) -> Result<ChatmuxConfig> {
    ChatmuxConfig::load(path, ENV_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_sources() {
        let config = ChatmuxConfig::load(None, "CHATMUX_TEST_EMPTY").unwrap();
        assert_eq!(config, ChatmuxConfig::default());
        assert!(config.fallback.enabled);
        assert_eq!(config.lifecycle(Platform::Kick).open_timeout_ms, Some(120_000));
    }

    #[test]
    fn test_load_file_keeps_platform_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("chatmux.toml");

        let config_content = r#"
[platforms.tiktok]
max_attempts = 8
initial_delay_ms = 500

[fallback]
vendor_name = "Euler"
extra_indicators = ["Sign Server Busy"]

[kick]
browser_path = "/opt/chromium/chrome"
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = ChatmuxConfig::load(Some(&config_path), "CHATMUX_TEST_FILE").unwrap();
        let tiktok = config.lifecycle(Platform::TikTok);

        assert_eq!(tiktok.max_attempts, 8);
        assert_eq!(tiktok.initial_delay_ms, 500);
        assert_eq!(tiktok.max_delay_ms, 30_000);
        assert_eq!(
            tiktok.open_timeout(Platform::TikTok),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            config.kick.browser_path,
            Some(PathBuf::from("/opt/chromium/chrome"))
        );

        let indicators = config.fallback.indicators();
        assert!(indicators.contains(&"euler blocked".to_string()));
        assert!(indicators.contains(&"sign server busy".to_string()));
        assert!(indicators.contains(&"429".to_string()));
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("CHATMUX_TEST_ENV_PLATFORMS__TWITCH__MAX_ATTEMPTS", "9");

        let config = ChatmuxConfig::load(None, "CHATMUX_TEST_ENV").unwrap();
        assert_eq!(config.lifecycle(Platform::Twitch).max_attempts, 9);

        std::env::remove_var("CHATMUX_TEST_ENV_PLATFORMS__TWITCH__MAX_ATTEMPTS");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("chatmux.toml");
        fs::write(&config_path, "[platforms.youtube]\nmax_attempts = 0\n").unwrap();

        assert!(ChatmuxConfig::load(Some(&config_path), "CHATMUX_TEST_INVALID").is_err());
    }

    #[test]
    fn test_renders_toml() {
        let rendered = ChatmuxConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[platforms.twitch]"));
        assert!(rendered.contains("vendor_name = \"tiktok\""));
    }
}
