//! Unified outbound events
//!
//! Every platform adapter translates its vendor payloads into these shapes, so
//! the relay layer and the browser UI handle exactly one event format.

use crate::{FeedSource, Platform};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch, wall clock
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Why a live connection went away, derived at the moment of disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClassification {
    /// Lost before the connection ever came up
    DuringBringUp,
    /// Came up, then dropped before the minimum stable uptime
    UnstableEarlyDrop,
    /// Ran for at least the minimum stable uptime, then dropped
    StableThenLost,
    /// Platform reported rate limiting
    RateLimited,
}

impl FailureClassification {
    /// Only drops of an established, stable connection are retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClassification::StableThenLost)
    }
}

/// Chat badge (subscriber tier, moderator, gifter level...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    /// Platform badge identifier
    pub id: String,
    /// Human readable label when the platform provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A chat message in the unified shape relayed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Platform the message was posted on
    pub platform: Platform,
    /// Platform user id of the author (wire name kept for client compatibility)
    #[serde(rename = "odlUserId")]
    pub user_id: String,
    /// Login/handle of the author
    pub username: String,
    /// Display name of the author
    pub display_name: String,
    /// Message text with platform emotes flattened to text
    pub message: String,
    /// When the platform says the message was sent
    pub timestamp_ms: i64,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    /// Author badges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<Badge>,
    /// Author moderates the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mod: Option<bool>,
    /// Author is a subscriber/member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_subscriber: Option<bool>,
    /// Platform-specific extras (message ids, colors, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// What the connection landed on, sent with `Connected`/`Reconnected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Normalized target the connection was opened for
    pub target: String,
    /// Which data source served the connection
    pub source: FeedSource,
    /// Stream/room title when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Platform room/channel id when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// Payload of a [`ConnectionEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// First successful bring-up of a connection
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Channel details
        channel_info: ChannelInfo,
    },
    /// Successful bring-up after an automatic retry
    #[serde(rename_all = "camelCase")]
    Reconnected {
        /// Channel details
        channel_info: ChannelInfo,
    },
    /// Connection went away
    #[serde(rename_all = "camelCase")]
    Disconnected {
        /// Human readable reason, always present
        reason_text: String,
        /// How the drop was classified
        classification: FailureClassification,
        /// No further automatic retries will happen
        terminal: bool,
        /// Delay before the scheduled retry, when one is scheduled
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },
    /// The broadcast itself ended
    StreamEnded {},
    /// A chat message
    ChatMessage(ChatMessage),
    /// Platform events with no unified counterpart (gifts, likes, raids)
    #[serde(rename_all = "camelCase")]
    PlatformSpecific {
        /// Vendor event name
        name: String,
        /// Vendor payload, passed through untouched
        payload: Value,
    },
}

impl EventKind {
    /// Whether this event moves the platform into the connected state
    pub fn is_connect(&self) -> bool {
        matches!(self, EventKind::Connected { .. } | EventKind::Reconnected { .. })
    }

    /// Whether this event moves the platform out of the connected state
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            EventKind::Disconnected { .. } | EventKind::StreamEnded {}
        )
    }
}

/// Outbound event envelope, one shape for all platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    /// Platform the event belongs to
    pub platform: Platform,
    /// Data source that produced the event
    pub source: FeedSource,
    /// Connection instance that produced the event; used for stale-event filtering
    #[serde(skip)]
    pub instance: u64,
    /// When the event was stamped
    pub timestamp_ms: i64,
    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ConnectionEvent {
    /// Stamp `kind` with identity and the current time
    pub fn new(platform: Platform, source: FeedSource, instance: u64, kind: EventKind) -> Self {
        Self {
            platform,
            source,
            instance,
            timestamp_ms: now_ms(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connected_event_carries_source_marker() {
        let event = ConnectionEvent::new(
            Platform::TikTok,
            FeedSource::Fallback,
            7,
            EventKind::Connected {
                channel_info: ChannelInfo {
                    target: "alice".into(),
                    source: FeedSource::Fallback,
                    title: None,
                    room_id: Some("7301".into()),
                },
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["platform"], "tiktok");
        assert_eq!(value["channelInfo"]["source"], "fallback");
        assert_eq!(value["channelInfo"]["roomId"], "7301");
        assert!(value.get("instance").is_none());
    }

    #[test]
    fn chat_message_uses_relay_field_names() {
        let msg = ChatMessage {
            platform: Platform::Twitch,
            user_id: "1234".into(),
            username: "viewer".into(),
            display_name: "Viewer".into(),
            message: "hello".into(),
            timestamp_ms: 1_700_000_000_000,
            profile_picture_url: None,
            badges: vec![Badge { id: "subscriber/12".into(), name: None }],
            is_mod: Some(false),
            is_subscriber: Some(true),
            metadata: None,
        };

        let value = serde_json::to_value(EventKind::ChatMessage(msg)).unwrap();
        assert_eq!(value["type"], "chatMessage");
        assert_eq!(value["odlUserId"], "1234");
        assert_eq!(value["displayName"], "Viewer");
        assert_eq!(value["badges"], json!([{ "id": "subscriber/12" }]));
        assert!(value.get("profilePictureUrl").is_none());
    }

    #[test]
    fn only_stable_drops_are_retryable() {
        assert!(FailureClassification::StableThenLost.is_retryable());
        assert!(!FailureClassification::UnstableEarlyDrop.is_retryable());
        assert!(!FailureClassification::DuringBringUp.is_retryable());
        assert!(!FailureClassification::RateLimited.is_retryable());
    }
}
