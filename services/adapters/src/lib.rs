//! # Chatmux Adapters - Connection Lifecycle Layer
//!
//! ## Purpose
//!
//! Keeps one client session's live-chat connections to TikTok, Twitch, Kick and
//! YouTube up, and turns everything those platforms say into one event shape.
//! Each platform connection is driven by the same generic lifecycle state
//! machine; the platforms differ only in the adapter that speaks their protocol.
//!
//! ## Integration Points
//!
//! - **Inbound commands**: `connect(platform, target, options)` and
//!   `disconnect(platform)` on a [`SessionRouter`]
//! - **Outbound events**: one `mpsc::Receiver<ConnectionEvent>` per session,
//!   carrying connection-state changes and unified chat messages
//! - **Platform clients**: anything implementing [`PlatformClient`], supplied per
//!   platform and data source by a [`ClientProvider`]
//! - **Statistics**: a [`ConnectionCounter`] receives `+1`/`-1` whenever a
//!   platform enters or leaves the connected state
//! - **Configuration**: per-platform [`LifecycleSettings`](chatmux_config::LifecycleSettings)
//!   from the `chatmux-config` crate
//!
//! ## Architecture Role
//!
//! ```text
//! SessionRouter ──► FallbackCoordinator (TikTok) ──► LifecycleManager ──► ClientAdapter ──► PlatformClient
//!       │                                         └─► LifecycleManager (fallback source)
//!       └─────────► LifecycleManager (Twitch/Kick/YouTube) ──► ClientAdapter ──► PlatformClient
//! ```
//!
//! Events flow the opposite way. Adapters translate vendor payloads; lifecycle
//! managers stamp platform, source and connection instance and add the
//! connection-state events; the router drops events from replaced connections
//! and keeps the connected-platform count balanced.
//!
//! ## Retry Policy
//!
//! - A failed **first** attempt is returned to the caller and never retried.
//! - A drop within `min_stable_ms` of coming up is a failed bring-up: terminal.
//! - A drop after `min_stable_ms` reconnects with exponential backoff
//!   (`initial_delay * 2^n`, capped at `max_delay`) until `max_attempts`.
//! - Staying up for `stable_confirm_ms` resets the retry budget.
//! - A rate-limited TikTok connection switches once to the fallback source.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adapter_service::{ActiveConnections, BundledClients, ConnectOptions, SessionRouter};
//! use chatmux_config::ChatmuxConfig;
//! use std::sync::Arc;
//! use types::Platform;
//!
//! # async fn run() -> adapter_service::Result<()> {
//! let config = Arc::new(ChatmuxConfig::default());
//! let clients = Arc::new(BundledClients::new(config.twitch.clone()));
//! let (router, mut events) = SessionRouter::new(
//!     "session-1",
//!     config,
//!     clients,
//!     Arc::new(ActiveConnections::new()),
//! );
//!
//! router.connect(Platform::Twitch, "#somestreamer", ConnectOptions::default()).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.kind);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod counter;
pub mod error;
pub mod fallback;
pub mod input;
pub mod lifecycle;
pub mod rate_limit;
pub mod router;
pub mod stability;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{next_delay, BackoffPolicy};
pub use counter::{ActiveConnections, ConnectionCounter};
pub use error::{LifecycleError, Result};
pub use fallback::FallbackCoordinator;
pub use input::collectors::{
    adapter_factory, BundledClients, KickTranslator, TikTokTranslator, TwitchIrcClient,
    TwitchTranslator, YouTubeTranslator,
};
pub use input::{
    AdapterEvent, AdapterFactory, ClientAdapter, ClientProvider, ClientSignal, PlatformAdapter,
    PlatformClient, PlatformTranslator, ReadyInfo,
};
pub use lifecycle::{
    LifecycleManager, LifecycleState, ManagerOptions, PlatformConnection, RetryState,
};
pub use rate_limit::{RateLimitDetector, SubstringDetector};
pub use router::{ConnectOptions, SessionRouter};
pub use stability::StabilityWindow;

pub use types::{
    ChannelInfo, ChatMessage, ConnectionEvent, ConnectionTarget, EventKind,
    FailureClassification, FeedSource, Platform,
};
