//! YouTube translator
//!
//! Live chat actions as delivered by the YouTube chat client: message runs
//! with text and emoji segments, author flags, and an optional Super Chat block.

use super::{value_millis, value_string};
use crate::input::{AdapterEvent, PlatformTranslator, ReadyInfo};
use crate::{LifecycleError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use types::{now_ms, Badge, ChatMessage, Platform};

/// Parsed YouTube chat action
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YouTubeChatEvent {
    /// Action id
    pub id: String,
    /// Author display name
    pub author_name: String,
    /// Author channel id
    pub author_channel_id: String,
    /// Author avatar
    #[serde(default)]
    pub author_photo: Option<String>,
    /// Message runs
    #[serde(default)]
    pub message: Vec<MessageRun>,
    /// Send time
    #[serde(default)]
    pub timestamp: Value,
    /// Author is the channel owner
    #[serde(default)]
    pub is_owner: bool,
    /// Author moderates the chat
    #[serde(default)]
    pub is_moderator: bool,
    /// Author is verified
    #[serde(default)]
    pub is_verified: bool,
    /// Channel membership, absent for non-members
    #[serde(default)]
    pub membership: Option<Membership>,
    /// Super Chat details
    #[serde(default)]
    pub superchat: Option<Value>,
}

/// One run of a chat message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRun {
    /// Plain text
    #[serde(default)]
    pub text: Option<String>,
    /// Emoji shortcut such as `:wave:`
    #[serde(default)]
    pub emoji_text: Option<String>,
}

/// Membership block
#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    /// Label such as "Member (6 months)"
    #[serde(default)]
    pub status: Option<String>,
}

/// Concatenate runs, rendering emoji as their shortcut text
pub fn flatten_runs(runs: &[MessageRun]) -> String {
    runs.iter()
        .filter_map(|run| run.text.as_deref().or(run.emoji_text.as_deref()))
        .collect()
}

impl TryFrom<YouTubeChatEvent> for ChatMessage {
    type Error = LifecycleError;

    fn try_from(event: YouTubeChatEvent) -> Result<Self> {
        if event.author_channel_id.is_empty() {
            return Err(LifecycleError::ParseError {
                platform: Platform::YouTube,
                message: "authorChannelId validation".to_string(),
                error: "Empty authorChannelId".to_string(),
            });
        }

        let mut badges = Vec::new();
        if event.is_owner {
            badges.push(Badge { id: "owner".into(), name: None });
        }
        if event.is_moderator {
            badges.push(Badge { id: "moderator".into(), name: None });
        }
        if event.is_verified {
            badges.push(Badge { id: "verified".into(), name: None });
        }
        if let Some(membership) = &event.membership {
            badges.push(Badge {
                id: "member".into(),
                name: membership.status.clone(),
            });
        }

        let mut metadata = Map::new();
        metadata.insert("messageId".to_string(), Value::String(event.id.clone()));
        if let Some(superchat) = event.superchat.clone() {
            metadata.insert("superchat".to_string(), superchat);
        }

        Ok(ChatMessage {
            platform: Platform::YouTube,
            user_id: event.author_channel_id.clone(),
            username: event.author_channel_id,
            display_name: event.author_name,
            message: flatten_runs(&event.message),
            timestamp_ms: value_millis(&event.timestamp).unwrap_or_else(now_ms),
            profile_picture_url: event.author_photo,
            badges,
            is_mod: Some(event.is_moderator || event.is_owner),
            is_subscriber: Some(event.membership.is_some()),
            metadata: Some(metadata),
        })
    }
}

/// YouTube payload translator
#[derive(Debug, Clone, Copy, Default)]
pub struct YouTubeTranslator;

impl PlatformTranslator for YouTubeTranslator {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn ready_info(&self, payload: &Value) -> ReadyInfo {
        ReadyInfo {
            title: payload.get("title").and_then(value_string),
            room_id: payload
                .get("channelId")
                .or_else(|| payload.get("videoId"))
                .and_then(value_string),
            via_content: false,
        }
    }

    fn translate(&self, event: &str, payload: Value) -> Result<Option<AdapterEvent>> {
        match event {
            "chat" | "superchat" => {
                let parsed: YouTubeChatEvent = serde_json::from_value(payload)?;
                Ok(Some(AdapterEvent::Chat(ChatMessage::try_from(parsed)?)))
            }
            "end" => Ok(Some(AdapterEvent::StreamEnded)),
            "membership" | "membershipGift" | "poll" | "banner" | "deleted" => {
                Ok(Some(AdapterEvent::PlatformSpecific {
                    name: event.to_string(),
                    payload,
                }))
            }
            _ => Ok(None),
        }
    }
}
