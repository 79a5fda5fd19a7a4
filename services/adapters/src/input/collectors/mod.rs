//! Platform-specific payload translators and the bundled clients

pub mod kick;
pub mod tiktok;
pub mod twitch;
pub mod twitch_irc;
pub mod youtube;


pub use kick::KickTranslator;
pub use tiktok::TikTokTranslator;
pub use twitch::TwitchTranslator;
pub use twitch_irc::TwitchIrcClient;
pub use youtube::YouTubeTranslator;

use super::{AdapterFactory, ClientAdapter, ClientProvider, PlatformAdapter, PlatformClient};
use crate::{LifecycleError, Result};
use chatmux_config::{ChatmuxConfig, TwitchSettings};
use serde_json::Value;
use std::sync::Arc;
use types::{FeedSource, Platform};

/// String or number field rendered as a string
pub fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Millisecond timestamp from a number, numeric string or RFC 3339 string
pub fn value_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

/// Clients bundled with this crate
///
/// Only the Twitch client ships here; the other platforms need vendor client
/// libraries, registered through a custom [`ClientProvider`].
#[derive(Debug, Clone, Default)]
pub struct BundledClients {
    twitch: TwitchSettings,
}

impl BundledClients {
    /// Provider using the given Twitch settings
    pub fn new(twitch: TwitchSettings) -> Self {
        Self { twitch }
    }
}

impl ClientProvider for BundledClients {
    fn client(&self, platform: Platform, source: FeedSource) -> Result<Box<dyn PlatformClient>> {
        match (platform, source) {
            (Platform::Twitch, FeedSource::Primary) => {
                Ok(Box::new(TwitchIrcClient::new(self.twitch.websocket_url.clone())))
            }
            _ => Err(LifecycleError::Precondition {
                platform,
                reason: format!("no client library registered for {} source", source),
            }),
        }
    }
}

/// Factory producing a fresh client-backed adapter per attempt
pub fn adapter_factory(
    platform: Platform,
    source: FeedSource,
    clients: Arc<dyn ClientProvider>,
    config: &ChatmuxConfig,
) -> AdapterFactory {
    fn build<T: super::PlatformTranslator>(
        translator: T,
        clients: Arc<dyn ClientProvider>,
        source: FeedSource,
    ) -> AdapterFactory {
        let translator = Arc::new(translator);
        Arc::new(move || -> Box<dyn PlatformAdapter> {
            Box::new(ClientAdapter::new(translator.clone(), clients.clone(), source))
        })
    }

    match platform {
        Platform::TikTok => build(TikTokTranslator, clients, source),
        Platform::Twitch => build(TwitchTranslator, clients, source),
        Platform::Kick => build(
            KickTranslator::new(config.kick.browser_path.clone()),
            clients,
            source,
        ),
        Platform::YouTube => build(YouTubeTranslator, clients, source),
    }
}
