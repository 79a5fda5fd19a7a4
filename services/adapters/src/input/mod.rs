//! Input adapters wrapping one platform's chat client each

pub mod client;
pub mod collectors;

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use types::{ChatMessage, ConnectionTarget, Platform};

pub use client::{ClientAdapter, ClientProvider, ClientSignal, PlatformClient, PlatformTranslator};

/// Event produced by an open adapter, already in the unified shape
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A chat message
    Chat(ChatMessage),
    /// Vendor event with no unified counterpart
    PlatformSpecific {
        /// Vendor event name
        name: String,
        /// Vendor payload
        payload: Value,
    },
    /// The broadcast ended
    StreamEnded,
    /// The client died; the string is the reason it reported
    Fatal(String),
}

impl AdapterEvent {
    /// Chat and vendor events count as content; lifecycle signals do not
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            AdapterEvent::Chat(_) | AdapterEvent::PlatformSpecific { .. }
        )
    }
}

/// What `open` learned about the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyInfo {
    /// Stream/room title
    pub title: Option<String>,
    /// Platform room/channel id
    pub room_id: Option<String>,
    /// Open settled on the first content event rather than an explicit ready
    pub via_content: bool,
}

/// One platform connection; a fresh instance is created for every attempt
///
/// Adapters do not retry. A failed `open` or a `Fatal` event is final for the
/// instance; retry policy lives in the lifecycle manager.
#[async_trait]
pub trait PlatformAdapter: Send {
    /// Platform this adapter connects to
    fn platform(&self) -> Platform;

    /// Check local requirements before any network traffic
    fn check_preconditions(&self) -> Result<()> {
        Ok(())
    }

    /// Connect and wait for the handshake to settle
    ///
    /// Settles exactly once. Rejections that arrive after success surface as
    /// an [`AdapterEvent::Fatal`] instead.
    async fn open(&mut self, target: &ConnectionTarget) -> Result<ReadyInfo>;

    /// Tear down the client; idempotent, never fails
    async fn close(&mut self);

    /// Take the event stream of an open adapter; `None` before `open` or once taken
    fn events(&mut self) -> Option<mpsc::Receiver<AdapterEvent>>;
}

/// Creates a fresh adapter for each connection attempt
pub type AdapterFactory = Arc<dyn Fn() -> Box<dyn PlatformAdapter> + Send + Sync>;
