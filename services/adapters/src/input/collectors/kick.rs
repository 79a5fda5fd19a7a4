//! Kick translator
//!
//! Kick chat arrives as Pusher events. The client has to drive a local
//! browser past Kick's edge protection before it can subscribe, and it never
//! sends an explicit "ready": the first chat event is the first proof that the
//! subscription works.

use super::{value_millis, value_string};
use crate::input::{AdapterEvent, PlatformTranslator, ReadyInfo};
use crate::{LifecycleError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use types::{now_ms, Badge, ChatMessage, Platform};

/// Browser binaries searched on `PATH` when none is configured
const BROWSER_CANDIDATES: [&str; 5] = [
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const CHAT_EVENT: &str = "App\\Events\\ChatMessageEvent";
const STREAM_END_EVENT: &str = "App\\Events\\StopStreamBroadcast";
const PASSTHROUGH_EVENTS: [&str; 6] = [
    "App\\Events\\SubscriptionEvent",
    "App\\Events\\GiftedSubscriptionsEvent",
    "App\\Events\\UserBannedEvent",
    "App\\Events\\MessageDeletedEvent",
    "App\\Events\\PinnedMessageCreatedEvent",
    "App\\Events\\ChatroomUpdatedEvent",
];

static EMOTE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[emote:\d+:([^\]]+)\]").expect("emote pattern is valid"));

/// Parsed Kick chat event
#[derive(Debug, Clone, Deserialize)]
pub struct KickChatEvent {
    /// Message id
    pub id: String,
    /// Chatroom the message was posted in
    #[serde(default)]
    pub chatroom_id: Value,
    /// Message text with `[emote:id:name]` markup
    pub content: String,
    /// RFC 3339 send time
    #[serde(default)]
    pub created_at: Value,
    /// Author
    pub sender: KickSender,
}

/// Author of a Kick chat event
#[derive(Debug, Clone, Deserialize)]
pub struct KickSender {
    /// Numeric user id
    pub id: Value,
    /// Display name
    pub username: String,
    /// Login slug
    #[serde(default)]
    pub slug: Option<String>,
    /// Badges and color
    #[serde(default)]
    pub identity: Option<KickIdentity>,
}

/// Author identity block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KickIdentity {
    /// Name color
    #[serde(default)]
    pub color: Option<String>,
    /// Badges
    #[serde(default)]
    pub badges: Vec<KickBadge>,
}

/// Badge attached to a Kick sender
#[derive(Debug, Clone, Deserialize)]
pub struct KickBadge {
    /// Badge category (`moderator`, `subscriber`, `broadcaster`, ...)
    #[serde(rename = "type")]
    pub badge_type: String,
    /// Badge label
    #[serde(default)]
    pub text: Option<String>,
}

/// Replace `[emote:123:name]` markup with the emote name
pub fn flatten_emotes(content: &str) -> String {
    EMOTE_PATTERN.replace_all(content, "$1").into_owned()
}

impl TryFrom<KickChatEvent> for ChatMessage {
    type Error = LifecycleError;

    fn try_from(event: KickChatEvent) -> Result<Self> {
        let user_id = value_string(&event.sender.id).ok_or_else(|| LifecycleError::ParseError {
            platform: Platform::Kick,
            message: "sender.id".to_string(),
            error: "missing sender id".to_string(),
        })?;

        let identity = event.sender.identity.unwrap_or_default();
        let has_badge = |kinds: &[&str]| {
            identity
                .badges
                .iter()
                .any(|b| kinds.contains(&b.badge_type.as_str()))
        };
        let is_mod = has_badge(&["moderator", "broadcaster"]);
        let is_subscriber = has_badge(&["subscriber", "founder"]);

        let mut metadata = Map::new();
        metadata.insert("messageId".to_string(), Value::String(event.id));
        if let Some(room) = value_string(&event.chatroom_id) {
            metadata.insert("chatroomId".to_string(), Value::String(room));
        }
        if let Some(color) = identity.color.clone() {
            metadata.insert("color".to_string(), Value::String(color));
        }

        Ok(ChatMessage {
            platform: Platform::Kick,
            user_id,
            username: event
                .sender
                .slug
                .clone()
                .unwrap_or_else(|| event.sender.username.to_lowercase()),
            display_name: event.sender.username,
            message: flatten_emotes(&event.content),
            timestamp_ms: value_millis(&event.created_at).unwrap_or_else(now_ms),
            profile_picture_url: None,
            badges: identity
                .badges
                .into_iter()
                .map(|b| Badge {
                    id: b.badge_type,
                    name: b.text,
                })
                .collect(),
            is_mod: Some(is_mod),
            is_subscriber: Some(is_subscriber),
            metadata: Some(metadata),
        })
    }
}

/// Kick payload translator
#[derive(Debug, Clone, Default)]
pub struct KickTranslator {
    browser_path: Option<PathBuf>,
}

impl KickTranslator {
    /// Translator checking for `browser_path`, or searching `PATH` when unset
    pub fn new(browser_path: Option<PathBuf>) -> Self {
        Self { browser_path }
    }

    /// Browser binary the client will drive
    pub fn locate_browser(&self) -> Option<PathBuf> {
        if let Some(path) = &self.browser_path {
            return path.is_file().then(|| path.clone());
        }

        let search_path = std::env::var_os("PATH")?;
        std::env::split_paths(&search_path).find_map(|dir| {
            BROWSER_CANDIDATES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

impl PlatformTranslator for KickTranslator {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    fn ready_on_first_content(&self) -> bool {
        true
    }

    fn check_preconditions(&self) -> Result<()> {
        match self.locate_browser() {
            Some(_) => Ok(()),
            None => Err(LifecycleError::Precondition {
                platform: Platform::Kick,
                reason: match &self.browser_path {
                    Some(path) => format!("configured browser {} not found", path.display()),
                    None => format!(
                        "no browser binary found on PATH (tried {})",
                        BROWSER_CANDIDATES.join(", ")
                    ),
                },
            }),
        }
    }

    fn ready_info(&self, payload: &Value) -> ReadyInfo {
        ReadyInfo {
            title: payload.get("title").and_then(value_string),
            room_id: payload
                .get("chatroom_id")
                .or_else(|| payload.get("chatroomId"))
                .and_then(value_string),
            via_content: false,
        }
    }

    fn translate(&self, event: &str, payload: Value) -> Result<Option<AdapterEvent>> {
        match event {
            CHAT_EVENT => {
                let parsed: KickChatEvent = serde_json::from_value(payload)?;
                Ok(Some(AdapterEvent::Chat(ChatMessage::try_from(parsed)?)))
            }
            STREAM_END_EVENT => Ok(Some(AdapterEvent::StreamEnded)),
            name if PASSTHROUGH_EVENTS.contains(&name) => Ok(Some(AdapterEvent::PlatformSpecific {
                name: name.rsplit('\\').next().unwrap_or(name).to_string(),
                payload,
            })),
            _ => Ok(None),
        }
    }
}
