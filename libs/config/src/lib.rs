//! # Chatmux Configuration
//!
//! Policy constants for the connection lifecycle and the knobs every service
//! reads at startup.
//!
//! ## Features
//!
//! - **Lifecycle policy**: backoff bounds, retry budget, stability windows and
//!   handshake timeouts, tunable per platform ([`LifecycleSettings`])
//! - **Fallback policy**: rate-limit indicators and the on/off switch for the
//!   TikTok secondary source ([`FallbackSettings`])
//! - **Loading**: TOML file layered under `CHATMUX_*` environment overrides
//!   ([`ChatmuxConfig::load`])
//!
//! ## Usage
//!
//! ```rust
//! use chatmux_config::ChatmuxConfig;
//! use types::Platform;
//!
//! let config = ChatmuxConfig::default();
//! let twitch = config.lifecycle(Platform::Twitch);
//! assert_eq!(twitch.max_attempts, 5);
//! ```

pub mod lifecycle;
pub mod service_config;

pub use lifecycle::{default_open_timeout_ms, LifecycleSettings};
pub use service_config::{
    load_config, ChatmuxConfig, FallbackSettings, KickSettings, PlatformTable, TwitchSettings,
    ENV_PREFIX,
};
