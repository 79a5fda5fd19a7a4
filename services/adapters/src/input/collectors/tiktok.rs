//! # TikTok Translator
//!
//! Translates TikTok LIVE webcast events into unified events. Both data
//! sources (the direct webcast client and the fallback provider) deliver the
//! same event shapes, so one translator serves both.
//!
//! ## Event Mapping
//!
//! | Vendor event | Unified event |
//! |--------------|---------------|
//! | `chat` | `ChatMessage` |
//! | `streamEnd` | `StreamEnded` |
//! | `gift`, `like`, `member`, `social`, `follow`, `share`, `subscribe`, `roomUser` | `PlatformSpecific` |
//!
//! Anything else is dropped.

use super::{value_millis, value_string};
use crate::input::{AdapterEvent, PlatformTranslator, ReadyInfo};
use crate::{LifecycleError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use types::{now_ms, Badge, ChatMessage, Platform};

const PASSTHROUGH_EVENTS: [&str; 8] = [
    "gift", "like", "member", "social", "follow", "share", "subscribe", "roomUser",
];

/// Parsed TikTok chat event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TikTokChatEvent {
    /// Numeric user id
    #[serde(default)]
    pub user_id: Value,
    /// Handle without the `@`
    pub unique_id: String,
    /// Display name
    #[serde(default)]
    pub nickname: Option<String>,
    /// Message text
    pub comment: String,
    /// Avatar URL
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    /// Author moderates the room
    #[serde(default)]
    pub is_moderator: Option<bool>,
    /// Author subscribes to the host
    #[serde(default)]
    pub is_subscriber: Option<bool>,
    /// Badges as reported by the webcast
    #[serde(default)]
    pub user_badges: Vec<TikTokBadge>,
    /// Send time, milliseconds (sometimes as a string)
    #[serde(default)]
    pub create_time: Value,
    /// Webcast message id
    #[serde(default)]
    pub msg_id: Value,
}

/// Badge attached to a TikTok chat event
#[derive(Debug, Clone, Deserialize)]
pub struct TikTokBadge {
    /// Badge category
    #[serde(rename = "type", default)]
    pub badge_type: Option<String>,
    /// Badge label
    #[serde(default)]
    pub name: Option<String>,
}

impl TikTokChatEvent {
    /// Reject events that cannot produce a usable message
    pub fn validate(&self) -> Result<()> {
        if self.unique_id.trim().is_empty() {
            return Err(LifecycleError::ParseError {
                platform: Platform::TikTok,
                message: "uniqueId validation".to_string(),
                error: "Empty uniqueId".to_string(),
            });
        }
        Ok(())
    }
}

impl TryFrom<TikTokChatEvent> for ChatMessage {
    type Error = LifecycleError;

    fn try_from(event: TikTokChatEvent) -> Result<Self> {
        event.validate()?;

        let badges = event
            .user_badges
            .into_iter()
            .filter_map(|b| match (b.badge_type, b.name) {
                (Some(id), name) => Some(Badge { id, name }),
                (None, Some(name)) => Some(Badge {
                    id: name.clone(),
                    name: Some(name),
                }),
                (None, None) => None,
            })
            .collect();

        let metadata = value_string(&event.msg_id).map(|id| {
            let mut map = Map::new();
            map.insert("msgId".to_string(), Value::String(id));
            map
        });

        Ok(ChatMessage {
            platform: Platform::TikTok,
            user_id: value_string(&event.user_id).unwrap_or_else(|| event.unique_id.clone()),
            display_name: event
                .nickname
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| event.unique_id.clone()),
            username: event.unique_id,
            message: event.comment,
            timestamp_ms: value_millis(&event.create_time).unwrap_or_else(now_ms),
            profile_picture_url: event.profile_picture_url,
            badges,
            is_mod: event.is_moderator,
            is_subscriber: event.is_subscriber,
            metadata,
        })
    }
}

/// TikTok payload translator
#[derive(Debug, Clone, Copy, Default)]
pub struct TikTokTranslator;

impl PlatformTranslator for TikTokTranslator {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn ready_info(&self, payload: &Value) -> ReadyInfo {
        ReadyInfo {
            title: payload
                .pointer("/roomInfo/title")
                .and_then(value_string),
            room_id: payload.get("roomId").and_then(value_string),
            via_content: false,
        }
    }

    fn translate(&self, event: &str, payload: Value) -> Result<Option<AdapterEvent>> {
        match event {
            "chat" => {
                let parsed: TikTokChatEvent = serde_json::from_value(payload)?;
                Ok(Some(AdapterEvent::Chat(ChatMessage::try_from(parsed)?)))
            }
            "streamEnd" => Ok(Some(AdapterEvent::StreamEnded)),
            name if PASSTHROUGH_EVENTS.contains(&name) => Ok(Some(AdapterEvent::PlatformSpecific {
                name: name.to_string(),
                payload,
            })),
            _ => Ok(None),
        }
    }
}
