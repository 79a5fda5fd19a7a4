//! Platform identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Streaming platforms a session can connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// TikTok LIVE rooms, addressed by creator handle
    TikTok,
    /// Twitch channels, addressed by login name
    Twitch,
    /// Kick channels, addressed by channel slug
    Kick,
    /// YouTube live streams, addressed by video reference
    YouTube,
}

impl Platform {
    /// Every supported platform, in routing order
    pub const ALL: [Platform; 4] = [
        Platform::TikTok,
        Platform::Twitch,
        Platform::Kick,
        Platform::YouTube,
    ];

    /// Stable lowercase identifier used on the wire and in config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Twitch => "twitch",
            Platform::Kick => "kick",
            Platform::YouTube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a platform name fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Platform::TikTok),
            "twitch" => Ok(Platform::Twitch),
            "kick" => Ok(Platform::Kick),
            "youtube" | "yt" => Ok(Platform::YouTube),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Which data source of a platform produced an event
///
/// Only TikTok ever switches to [`FeedSource::Fallback`], after the primary
/// source reports a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    /// The platform's regular client
    #[default]
    Primary,
    /// Secondary transport engaged after rate limiting
    Fallback,
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Primary => f.write_str("primary"),
            FeedSource::Fallback => f.write_str("fallback"),
        }
    }
}
