//! Twitch translator
//!
//! Consumes the payloads produced by [`TwitchIrcClient`](super::TwitchIrcClient):
//! one JSON object per IRC line with the message tags already unescaped.

use super::value_millis;
use crate::input::{AdapterEvent, PlatformTranslator, ReadyInfo};
use crate::{LifecycleError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use types::{now_ms, Badge, ChatMessage, Platform};

const ACTION_PREFIX: &str = "\u{1}ACTION ";

/// IRC line as emitted by the bundled client
#[derive(Debug, Clone, Deserialize)]
pub struct TwitchIrcPayload {
    /// IRC command (`PRIVMSG`, `USERNOTICE`, ...)
    pub command: String,
    /// IRCv3 tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Nick from the line prefix
    #[serde(default)]
    pub nick: Option<String>,
    /// Channel without the `#`
    #[serde(default)]
    pub channel: Option<String>,
    /// Trailing parameter
    #[serde(default)]
    pub text: Option<String>,
}

impl TwitchIrcPayload {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.tag(key).map(|v| v == "1")
    }
}

/// Parse a `badges` tag like `subscriber/12,moderator/1`
pub fn parse_badges(raw: &str) -> Vec<Badge> {
    raw.split(',')
        .filter(|b| !b.is_empty())
        .map(|b| match b.split_once('/') {
            Some((name, version)) => Badge {
                id: b.to_string(),
                name: Some(format!("{} {}", name, version)),
            },
            None => Badge {
                id: b.to_string(),
                name: None,
            },
        })
        .collect()
}

impl TryFrom<TwitchIrcPayload> for ChatMessage {
    type Error = LifecycleError;

    fn try_from(line: TwitchIrcPayload) -> Result<Self> {
        let username = line
            .nick
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LifecycleError::ParseError {
                platform: Platform::Twitch,
                message: "PRIVMSG prefix".to_string(),
                error: "missing nick".to_string(),
            })?;

        let raw_text = line.text.clone().unwrap_or_default();
        let (message, is_action) = match raw_text.strip_prefix(ACTION_PREFIX) {
            Some(rest) => (rest.trim_end_matches('\u{1}').to_string(), true),
            None => (raw_text, false),
        };

        let badges = line.tag("badges").map(parse_badges).unwrap_or_default();
        let is_mod = line
            .flag("mod")
            .map(|m| m || badges.iter().any(|b| b.id.starts_with("broadcaster/")));

        let mut metadata = Map::new();
        for (tag, key) in [("id", "messageId"), ("color", "color"), ("room-id", "roomId")] {
            if let Some(value) = line.tag(tag) {
                metadata.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        if is_action {
            metadata.insert("action".to_string(), Value::Bool(true));
        }

        Ok(ChatMessage {
            platform: Platform::Twitch,
            user_id: line.tag("user-id").unwrap_or(&username).to_string(),
            display_name: line.tag("display-name").unwrap_or(&username).to_string(),
            message,
            timestamp_ms: line
                .tag("tmi-sent-ts")
                .and_then(|ts| value_millis(&Value::String(ts.to_string())))
                .unwrap_or_else(now_ms),
            profile_picture_url: None,
            is_mod,
            is_subscriber: line.flag("subscriber"),
            badges,
            metadata: (!metadata.is_empty()).then_some(metadata),
            username,
        })
    }
}

/// Twitch payload translator
#[derive(Debug, Clone, Copy, Default)]
pub struct TwitchTranslator;

impl PlatformTranslator for TwitchTranslator {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn ready_info(&self, payload: &Value) -> ReadyInfo {
        ReadyInfo {
            title: None,
            room_id: payload.get("roomId").and_then(super::value_string),
            via_content: false,
        }
    }

    fn translate(&self, event: &str, payload: Value) -> Result<Option<AdapterEvent>> {
        match event {
            "PRIVMSG" => {
                let line: TwitchIrcPayload = serde_json::from_value(payload)?;
                Ok(Some(AdapterEvent::Chat(ChatMessage::try_from(line)?)))
            }
            "USERNOTICE" => {
                let name = payload
                    .pointer("/tags/msg-id")
                    .and_then(Value::as_str)
                    .unwrap_or("usernotice")
                    .to_string();
                Ok(Some(AdapterEvent::PlatformSpecific { name, payload }))
            }
            "CLEARCHAT" | "CLEARMSG" => Ok(Some(AdapterEvent::PlatformSpecific {
                name: event.to_lowercase(),
                payload,
            })),
            _ => Ok(None),
        }
    }
}
