//! Per-session connection router
//!
//! A [`SessionRouter`] owns at most one connection per platform for one client
//! session. All connections feed one internal channel; a pump task filters out
//! events from replaced connections, keeps the connected-platform count
//! balanced and forwards the rest to the session's outbound receiver.
//!
//! The TikTok fallback switch belongs to the session: once it has fired, later
//! TikTok connects in the same session start on the fallback source.

use crate::counter::ConnectionCounter;
use crate::fallback::FallbackCoordinator;
use crate::input::collectors::adapter_factory;
use crate::input::ClientProvider;
use crate::lifecycle::{LifecycleManager, LifecycleState, ManagerOptions, PlatformConnection};
use crate::rate_limit::{RateLimitDetector, SubstringDetector};
use crate::Result;
use chatmux_config::ChatmuxConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use types::{ChannelInfo, ConnectionEvent, ConnectionTarget, EventKind, FeedSource, Platform};

/// Capacity of the session's outbound channel
const SESSION_EVENT_BUFFER: usize = 1024;

/// Per-connect overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Override the platform's retry budget
    pub max_attempts: Option<u32>,
    /// Retry stable drops automatically
    pub auto_reconnect: bool,
    /// Override the configured fallback toggle (TikTok only)
    pub fallback: Option<bool>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            auto_reconnect: true,
            fallback: None,
        }
    }
}

struct Slot {
    instance: u64,
    conn: Arc<dyn PlatformConnection>,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    instance: u64,
    counted: bool,
}

type Slots = Arc<Mutex<HashMap<Platform, Slot>>>;
type Tracker = Arc<Mutex<HashMap<Platform, Tracked>>>;

/// Up to one connection per platform, multiplexed into one event stream
pub struct SessionRouter {
    session_id: String,
    config: Arc<ChatmuxConfig>,
    clients: Arc<dyn ClientProvider>,
    counter: Arc<dyn ConnectionCounter>,
    slots: Slots,
    tracker: Tracker,
    next_instance: AtomicU64,
    fallback_engaged: Arc<AtomicBool>,
    internal_tx: mpsc::Sender<ConnectionEvent>,
    pump: JoinHandle<()>,
}

impl SessionRouter {
    /// Create a router and the receiver for its multiplexed events
    pub fn new(
        session_id: impl Into<String>,
        config: Arc<ChatmuxConfig>,
        clients: Arc<dyn ClientProvider>,
        counter: Arc<dyn ConnectionCounter>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let session_id = session_id.into();
        let (internal_tx, internal_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let slots: Slots = Arc::new(Mutex::new(HashMap::new()));
        let tracker: Tracker = Arc::new(Mutex::new(HashMap::new()));

        let pump = tokio::spawn(pump(
            session_id.clone(),
            internal_rx,
            outbound_tx,
            slots.clone(),
            tracker.clone(),
            counter.clone(),
        ));

        let router = Self {
            session_id,
            config,
            clients,
            counter,
            slots,
            tracker,
            next_instance: AtomicU64::new(0),
            fallback_engaged: Arc::new(AtomicBool::new(false)),
            internal_tx,
            pump,
        };
        (router, outbound_rx)
    }

    /// Session this router belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Connect `platform` to `target`, replacing any existing connection
    ///
    /// Resolves once the first attempt settles. A failed first attempt leaves
    /// no connection behind.
    pub async fn connect(
        &self,
        platform: Platform,
        target: &str,
        options: ConnectOptions,
    ) -> Result<ChannelInfo> {
        let target = ConnectionTarget::new(platform, target)?;
        self.disconnect(platform).await;

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
        self.tracker.lock().insert(
            platform,
            Tracked {
                instance,
                counted: false,
            },
        );
        let conn = self.build(target.clone(), instance, options);
        self.slots.lock().insert(
            platform,
            Slot {
                instance,
                conn: conn.clone(),
            },
        );

        info!(
            session = %self.session_id,
            %platform,
            target = target.as_str(),
            instance,
            "Connecting platform"
        );
        let result = conn.connect().await;
        if result.is_err() {
            self.release(platform, instance);
        }
        result
    }

    /// Disconnect `platform`; a no-op when nothing is connected there
    pub async fn disconnect(&self, platform: Platform) {
        let slot = self.slots.lock().remove(&platform);
        let Some(slot) = slot else {
            debug!(session = %self.session_id, %platform, "Nothing to disconnect");
            return;
        };
        self.release(platform, slot.instance);
        slot.conn.disconnect().await;
        info!(session = %self.session_id, %platform, "Platform disconnected");
    }

    /// Disconnect every platform
    pub async fn shutdown(&self) {
        let platforms: Vec<Platform> = self.slots.lock().keys().copied().collect();
        futures::future::join_all(platforms.into_iter().map(|p| self.disconnect(p))).await;
    }

    /// Snapshot of every owned connection's state
    pub fn states(&self) -> HashMap<Platform, LifecycleState> {
        self.slots
            .lock()
            .iter()
            .map(|(platform, slot)| (*platform, slot.conn.state()))
            .collect()
    }

    /// Whether `platform` is open and usable
    pub fn is_connected(&self, platform: Platform) -> bool {
        self.slots
            .lock()
            .get(&platform)
            .map(|slot| slot.conn.is_connected())
            .unwrap_or(false)
    }

    /// Data source serving `platform`, if connected
    pub fn source(&self, platform: Platform) -> Option<FeedSource> {
        self.slots.lock().get(&platform).map(|slot| slot.conn.source())
    }

    /// Stop tracking `instance`, settling its count
    fn release(&self, platform: Platform, instance: u64) {
        {
            let mut slots = self.slots.lock();
            if slots.get(&platform).map(|s| s.instance) == Some(instance) {
                slots.remove(&platform);
            }
        }
        let mut tracker = self.tracker.lock();
        if let Some(tracked) = tracker.get(&platform).copied() {
            if tracked.instance == instance {
                tracker.remove(&platform);
                if tracked.counted {
                    self.counter.apply(-1);
                }
            }
        }
    }

    fn build(
        &self,
        target: ConnectionTarget,
        instance: u64,
        connect: ConnectOptions,
    ) -> Arc<dyn PlatformConnection> {
        let platform = target.platform();
        let mut settings = self.config.lifecycle(platform).clone();
        if let Some(max_attempts) = connect.max_attempts {
            settings.max_attempts = max_attempts.max(1);
        }

        let mut options = ManagerOptions::new(target, settings);
        options.instance = instance;
        options.auto_reconnect = connect.auto_reconnect;

        if platform == Platform::TikTok {
            let detector: Arc<dyn RateLimitDetector> =
                Arc::new(SubstringDetector::from_settings(&self.config.fallback));
            options.rate_limit = Some(detector.clone());

            if connect.fallback.unwrap_or(self.config.fallback.enabled) {
                let primary = adapter_factory(
                    platform,
                    FeedSource::Primary,
                    self.clients.clone(),
                    &self.config,
                );
                let secondary = adapter_factory(
                    platform,
                    FeedSource::Fallback,
                    self.clients.clone(),
                    &self.config,
                );
                return Arc::new(FallbackCoordinator::spawn(
                    options.clone(),
                    primary,
                    options,
                    secondary,
                    detector,
                    self.fallback_engaged.clone(),
                    self.internal_tx.clone(),
                ));
            }
        }

        let factory = adapter_factory(
            platform,
            FeedSource::Primary,
            self.clients.clone(),
            &self.config,
        );
        Arc::new(LifecycleManager::spawn(
            options,
            factory,
            self.internal_tx.clone(),
        ))
    }
}

impl Drop for SessionRouter {
    fn drop(&mut self) {
        self.pump.abort();
        let tracker = std::mem::take(&mut *self.tracker.lock());
        for _ in tracker.values().filter(|t| t.counted) {
            self.counter.apply(-1);
        }
    }
}

/// Forward current-instance events and keep the connected count balanced
async fn pump(
    session_id: String,
    mut events: mpsc::Receiver<ConnectionEvent>,
    outbound: mpsc::Sender<ConnectionEvent>,
    slots: Slots,
    tracker: Tracker,
    counter: Arc<dyn ConnectionCounter>,
) {
    while let Some(event) = events.recv().await {
        let platform = event.platform;
        let terminal = matches!(
            event.kind,
            EventKind::Disconnected { terminal: true, .. } | EventKind::StreamEnded {}
        );

        let current = {
            let mut tracker = tracker.lock();
            let current = match tracker.get_mut(&platform) {
                Some(tracked) if tracked.instance == event.instance => {
                    if event.kind.is_connect() && !tracked.counted {
                        tracked.counted = true;
                        counter.apply(1);
                    } else if event.kind.is_disconnect() && tracked.counted {
                        tracked.counted = false;
                        counter.apply(-1);
                    }
                    true
                }
                _ => false,
            };
            if current && terminal {
                tracker.remove(&platform);
            }
            current
        };

        if !current {
            debug!(
                session = %session_id,
                %platform,
                instance = event.instance,
                "Dropping event from replaced connection"
            );
            continue;
        }

        if terminal {
            let released = {
                let mut slots = slots.lock();
                match slots.get(&platform) {
                    Some(slot) if slot.instance == event.instance => slots.remove(&platform),
                    _ => None,
                }
            };
            drop(released);
        }

        if outbound.send(event).await.is_err() {
            debug!(session = %session_id, "Session receiver dropped");
            break;
        }
    }
}
