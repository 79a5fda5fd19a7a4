//! Connection lifecycle management
//!
//! One [`LifecycleManager`] owns one platform connection. It runs as a task
//! that receives `connect`/`disconnect` commands over a channel and drives a
//! state machine:
//!
//! ```text
//!            connect()            open ok
//!   Idle ─────────────► Connecting ─────────► Verifying ──► Connected
//!                          │   ▲                 │ content or      │
//!              open failed │   │ backoff elapsed │ min_stable      │
//!                          ▼   │                 ▼                 ▼
//!                   Disconnected  Reconnecting ◄── stable drop ────┘
//!                                      │
//!                                      └── budget spent ──► GivenUp
//! ```
//!
//! `disconnect()` wins from every state: it vetoes pending retries, cancels an
//! in-flight open and returns the manager to `Idle`.

mod machine;

#[cfg(test)]
mod tests;

use crate::input::AdapterFactory;
use crate::rate_limit::RateLimitDetector;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use chatmux_config::LifecycleSettings;
use machine::{Command, Machine};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use types::{ChannelInfo, ConnectionEvent, ConnectionTarget, FeedSource, Platform};

/// Lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not connected and not trying
    Idle,
    /// An open attempt is in flight
    Connecting,
    /// Open succeeded; waiting for content or the minimum stable uptime
    Verifying,
    /// Connection confirmed
    Connected,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
    /// Stopped after a non-retryable failure
    Disconnected(String),
    /// Stopped after spending the retry budget
    GivenUp(String),
}

impl LifecycleState {
    /// Open and usable (verifying counts: the handshake succeeded)
    pub fn is_connected(&self) -> bool {
        matches!(self, LifecycleState::Verifying | LifecycleState::Connected)
    }

    /// A connection exists or is being pursued
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Connecting
                | LifecycleState::Verifying
                | LifecycleState::Connected
                | LifecycleState::Reconnecting
        )
    }

    /// Stopped on its own; only a new `connect()` leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Disconnected(_) | LifecycleState::GivenUp(_)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Connecting => write!(f, "connecting"),
            LifecycleState::Verifying => write!(f, "verifying"),
            LifecycleState::Connected => write!(f, "connected"),
            LifecycleState::Reconnecting => write!(f, "reconnecting"),
            LifecycleState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
            LifecycleState::GivenUp(reason) => write!(f, "given up ({})", reason),
        }
    }
}

/// Retry bookkeeping, owned by one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Consecutive reconnect attempts since the last stable connection
    pub attempt_count: u32,
    /// Delay scheduled for the current or next attempt
    pub current_delay: Duration,
    /// Cleared by `disconnect()`; a retry that fires while cleared does nothing
    pub enabled: bool,
}

impl RetryState {
    fn fresh(initial: Duration) -> Self {
        Self {
            attempt_count: 0,
            current_delay: initial,
            enabled: true,
        }
    }
}

/// Everything a manager needs besides its adapter factory
#[derive(Clone)]
pub struct ManagerOptions {
    /// Platform to connect to
    pub platform: Platform,
    /// Normalized target
    pub target: ConnectionTarget,
    /// Data source the adapter uses
    pub source: FeedSource,
    /// Connection instance id stamped on every event
    pub instance: u64,
    /// Retry and stability policy
    pub settings: LifecycleSettings,
    /// Retry stable drops automatically
    pub auto_reconnect: bool,
    /// Classifies rate-limit drops; `None` disables the check
    pub rate_limit: Option<Arc<dyn RateLimitDetector>>,
}

impl ManagerOptions {
    /// Options with platform defaults for `target`
    pub fn new(target: ConnectionTarget, settings: LifecycleSettings) -> Self {
        Self {
            platform: target.platform(),
            target,
            source: FeedSource::Primary,
            instance: 0,
            settings,
            auto_reconnect: true,
            rate_limit: None,
        }
    }
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("platform", &self.platform)
            .field("target", &self.target)
            .field("source", &self.source)
            .field("instance", &self.instance)
            .field("settings", &self.settings)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("rate_limit", &self.rate_limit.is_some())
            .finish()
    }
}

/// State shared between the handle and its task
#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<SharedInner>,
}

#[derive(Debug)]
struct SharedInner {
    state: LifecycleState,
    retry: RetryState,
}

impl Shared {
    fn new(initial: Duration) -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                state: LifecycleState::Idle,
                retry: RetryState::fresh(initial),
            }),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.inner.lock().state.clone()
    }

    pub(crate) fn retry(&self) -> RetryState {
        self.inner.lock().retry
    }

    pub(crate) fn enabled(&self) -> bool {
        self.inner.lock().retry.enabled
    }

    /// Move to `next` unless a disconnect has vetoed the task; returns false if vetoed
    pub(crate) fn transition(&self, next: LifecycleState) -> bool {
        let mut inner = self.inner.lock();
        if !inner.retry.enabled {
            return false;
        }
        inner.state = next;
        true
    }

    /// Promote `Verifying` to `Connected`; no-op from any other state
    pub(crate) fn promote(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.retry.enabled && inner.state == LifecycleState::Verifying {
            inner.state = LifecycleState::Connected;
            return true;
        }
        false
    }

    /// Count one more reconnect attempt and record its delay; returns the new count
    pub(crate) fn record_attempt(&self, delay_for: impl FnOnce(u32) -> Duration) -> u32 {
        let mut inner = self.inner.lock();
        inner.retry.attempt_count = inner.retry.attempt_count.saturating_add(1);
        inner.retry.current_delay = delay_for(inner.retry.attempt_count);
        inner.retry.attempt_count
    }

    pub(crate) fn reset_retry(&self, initial: Duration) {
        let mut inner = self.inner.lock();
        inner.retry.attempt_count = 0;
        inner.retry.current_delay = initial;
    }

    fn enable(&self) {
        self.inner.lock().retry.enabled = true;
    }

    /// Veto retries and report `Idle` immediately
    fn veto(&self) {
        let mut inner = self.inner.lock();
        inner.retry.enabled = false;
        inner.state = LifecycleState::Idle;
    }
}

/// A platform connection as seen by the session router
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Platform this connection serves
    fn platform(&self) -> Platform;

    /// Data source currently serving the connection
    fn source(&self) -> FeedSource;

    /// Bring the connection up; resolves once the first attempt settles
    async fn connect(&self) -> Result<ChannelInfo>;

    /// Tear down; idempotent and always succeeds
    async fn disconnect(&self);

    /// Current state
    fn state(&self) -> LifecycleState;

    /// Retry bookkeeping
    fn retry_state(&self) -> RetryState;

    /// Open and usable
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

/// Handle to one connection's lifecycle task
///
/// Dropping the last handle stops the task and closes its adapter.
pub struct LifecycleManager {
    platform: Platform,
    source: FeedSource,
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl LifecycleManager {
    /// Spawn the lifecycle task; events go to `events` in emission order
    pub fn spawn(
        options: ManagerOptions,
        factory: AdapterFactory,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(8);
        let shared = Arc::new(Shared::new(options.settings.initial_delay()));
        let platform = options.platform;
        let source = options.source;

        debug!(%platform, %source, instance = options.instance, "Spawning lifecycle task");
        let machine = Machine::new(options, factory, command_rx, events, shared.clone());
        tokio::spawn(machine.run());

        Self {
            platform,
            source,
            commands,
            shared,
        }
    }

    /// Start connecting; resolves when the first attempt settles
    ///
    /// A failure of the first attempt is returned here and not retried.
    pub async fn connect(&self) -> Result<ChannelInfo> {
        self.shared.enable();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Stop everything: pending retries, in-flight opens, the live connection
    pub async fn disconnect(&self) {
        self.shared.veto();
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Open and usable
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Retry bookkeeping snapshot
    pub fn retry_state(&self) -> RetryState {
        self.shared.retry()
    }

    /// Platform this manager connects to
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Data source of this manager's adapters
    pub fn source(&self) -> FeedSource {
        self.source
    }

    fn stopped(&self) -> LifecycleError {
        LifecycleError::ManagerStopped {
            platform: self.platform,
        }
    }
}

#[async_trait]
impl PlatformConnection for LifecycleManager {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn source(&self) -> FeedSource {
        self.source
    }

    async fn connect(&self) -> Result<ChannelInfo> {
        LifecycleManager::connect(self).await
    }

    async fn disconnect(&self) {
        LifecycleManager::disconnect(self).await
    }

    fn state(&self) -> LifecycleState {
        LifecycleManager::state(self)
    }

    fn retry_state(&self) -> RetryState {
        LifecycleManager::retry_state(self)
    }
}
