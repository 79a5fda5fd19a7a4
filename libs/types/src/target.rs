//! Connection target normalization
//!
//! Users paste channel names in every shape imaginable: `@handle`, `#login`,
//! full profile URLs, watch links. A [`ConnectionTarget`] is built once from that
//! raw input, normalized per platform, and never mutated afterwards.

use crate::Platform;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors raised while normalizing a raw target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Nothing left after trimming and prefix stripping
    #[error("Empty {platform} target")]
    Empty {
        /// Platform the target was meant for
        platform: Platform,
    },

    /// Target contains characters or a shape the platform does not allow
    #[error("Invalid {platform} target '{value}': {reason}")]
    Invalid {
        /// Platform the target was meant for
        platform: Platform,
        /// Normalized value that failed validation
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Normalized identifier of what a connection points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    platform: Platform,
    value: String,
}

impl ConnectionTarget {
    /// Normalize `raw` for `platform`
    pub fn new(platform: Platform, raw: &str) -> Result<Self, TargetError> {
        let value = match platform {
            Platform::TikTok => normalize_handle(platform, raw, &["tiktok.com/"], '@', &['.', '_'])?,
            Platform::Twitch => normalize_handle(platform, raw, &["twitch.tv/"], '#', &['_'])?,
            Platform::Kick => normalize_handle(platform, raw, &["kick.com/"], '@', &['_', '-'])?,
            Platform::YouTube => normalize_video(raw)?,
        };

        Ok(Self { platform, value })
    }

    /// Platform this target belongs to
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Normalized value
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.value)
    }
}

impl Serialize for ConnectionTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

/// Strip scheme, `www.` and a host prefix like `twitch.tv/` from user input
fn strip_host<'a>(input: &'a str, hosts: &[&str]) -> &'a str {
    let mut rest = input;
    for scheme in ["https://", "http://"] {
        if let Some(stripped) = rest.strip_prefix(scheme) {
            rest = stripped;
            break;
        }
    }
    for sub in ["www.", "m."] {
        if let Some(stripped) = rest.strip_prefix(sub) {
            rest = stripped;
            break;
        }
    }
    for host in hosts {
        if let Some(stripped) = rest.strip_prefix(host) {
            rest = stripped;
            break;
        }
    }
    rest
}

fn normalize_handle(
    platform: Platform,
    raw: &str,
    hosts: &[&str],
    sigil: char,
    extra_chars: &[char],
) -> Result<String, TargetError> {
    let trimmed = raw.trim();
    let path = strip_host(trimmed, hosts);
    // Drop trailing path segments such as "/live" or query strings.
    let first = path
        .split(['/', '?', '#'])
        .find(|segment| !segment.is_empty() && *segment != "@")
        .unwrap_or("");
    let value = first.trim_start_matches(sigil).trim().to_lowercase();

    if value.is_empty() {
        return Err(TargetError::Empty { platform });
    }

    if let Some(bad) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !extra_chars.contains(c))
    {
        return Err(TargetError::Invalid {
            platform,
            value: value.clone(),
            reason: format!("unexpected character '{}'", bad),
        });
    }

    Ok(value)
}

const VIDEO_ID_LEN: usize = 11;

fn normalize_video(raw: &str) -> Result<String, TargetError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TargetError::Empty {
            platform: Platform::YouTube,
        });
    }

    let candidate = if trimmed.contains('/') || trimmed.contains('?') {
        extract_video_id(trimmed).ok_or_else(|| TargetError::Invalid {
            platform: Platform::YouTube,
            value: trimmed.to_string(),
            reason: "no video id in link".to_string(),
        })?
    } else {
        trimmed.to_string()
    };

    // Video ids are case-sensitive, so no case folding here.
    let valid = candidate.len() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(TargetError::Invalid {
            platform: Platform::YouTube,
            value: candidate,
            reason: format!("video id must be {} url-safe characters", VIDEO_ID_LEN),
        });
    }

    Ok(candidate)
}

fn extract_video_id(link: &str) -> Option<String> {
    let with_scheme = if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("https://{}", link)
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    if host == "youtu.be" {
        return url.path_segments()?.next().map(str::to_string);
    }

    if !host.ends_with("youtube.com") {
        return None;
    }

    if let Some((_, v)) = url.query_pairs().find(|(key, _)| key == "v") {
        return Some(v.into_owned());
    }

    let mut segments = url.path_segments()?;
    match segments.next()? {
        "live" | "shorts" | "embed" => segments.next().map(str::to_string),
        _ => None,
    }
}
