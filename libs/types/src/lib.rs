//! # Chatmux Shared Types
//!
//! Identity and event types shared by every chatmux crate.
//!
//! ## Contents
//!
//! - **Platforms**: [`Platform`] names the four supported streaming services and
//!   [`FeedSource`] marks whether an event came from the primary or the fallback
//!   data source of a platform.
//! - **Targets**: [`ConnectionTarget`] is the normalized channel/room/video reference
//!   a connection is opened against. Normalization happens once, at construction.
//! - **Events**: [`ConnectionEvent`] is the single outbound shape relayed to browser
//!   clients, carrying either a connection-state change or a unified
//!   [`ChatMessage`].
//!
//! ## Usage
//!
//! ```rust
//! use types::{ConnectionTarget, Platform};
//!
//! let target = ConnectionTarget::new(Platform::Twitch, "  #SomeStreamer ").unwrap();
//! assert_eq!(target.as_str(), "somestreamer");
//! ```
//!
//! This crate performs no I/O and has no async surface; it is safe to use from
//! the relay layer, the lifecycle service and tests alike.

#![warn(missing_docs)]

pub mod event;
pub mod platform;
pub mod target;

pub use event::{
    now_ms, Badge, ChannelInfo, ChatMessage, ConnectionEvent, EventKind, FailureClassification,
};
pub use platform::{FeedSource, Platform, UnknownPlatform};
pub use target::{ConnectionTarget, TargetError};
