//! Rate-limit fallback
//!
//! Wraps a primary lifecycle manager and, the first time the primary reports
//! rate limiting, swaps in a manager on the secondary data source. Callers
//! see one connection: the coordinator forwards events only from whichever
//! source is active and swallows the primary's rate-limit disconnect.
//!
//! The switch is guarded by a latch the caller owns, so a session that builds
//! several coordinators for one platform switches at most once. A coordinator
//! spawned after the latch has fired starts directly on the secondary source.
//! If the secondary fails, its failure is surfaced as-is.

use crate::input::AdapterFactory;
use crate::lifecycle::{LifecycleManager, LifecycleState, ManagerOptions, PlatformConnection, RetryState};
use crate::rate_limit::RateLimitDetector;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{
    ChannelInfo, ConnectionEvent, EventKind, FailureClassification, FeedSource, Platform,
};

struct Secondary {
    options: ManagerOptions,
    factory: AdapterFactory,
}

struct Inner {
    platform: Platform,
    active: Mutex<Arc<LifecycleManager>>,
    secondary: Mutex<Option<Secondary>>,
    engaged: Arc<AtomicBool>,
    closed: AtomicBool,
    detector: Arc<dyn RateLimitDetector>,
    internal_tx: mpsc::Sender<ConnectionEvent>,
    outbound: mpsc::Sender<ConnectionEvent>,
}

impl Inner {
    fn active(&self) -> Arc<LifecycleManager> {
        self.active.lock().clone()
    }

    /// Claim the one-time switch; true for exactly one caller
    fn engage(&self) -> bool {
        self.engaged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Swap the secondary in and connect it
    async fn switch_to_secondary(&self) -> Result<ChannelInfo> {
        let secondary = self
            .secondary
            .lock()
            .take()
            .ok_or_else(|| LifecycleError::Configuration("fallback already consumed".to_string()))?;
        if self.closed.load(Ordering::Acquire) {
            return Err(LifecycleError::Cancelled {
                platform: self.platform,
            });
        }

        let manager = Arc::new(LifecycleManager::spawn(
            secondary.options,
            secondary.factory,
            self.internal_tx.clone(),
        ));
        let previous = std::mem::replace(&mut *self.active.lock(), manager.clone());
        previous.disconnect().await;

        // A disconnect() that raced the swap may have missed the new manager.
        if self.closed.load(Ordering::Acquire) {
            manager.disconnect().await;
            return Err(LifecycleError::Cancelled {
                platform: self.platform,
            });
        }

        info!(platform = %self.platform, "Connecting fallback source");
        manager.connect().await
    }

    /// Surface a failed secondary connect as a terminal disconnect
    async fn report_secondary_failure(&self, err: &LifecycleError, instance: u64) {
        if matches!(err, LifecycleError::Cancelled { .. }) {
            return;
        }
        let event = ConnectionEvent::new(
            self.platform,
            FeedSource::Fallback,
            instance,
            EventKind::Disconnected {
                reason_text: err.reason_text(),
                classification: if self.detector.is_rate_limited(&err.reason_text()) {
                    FailureClassification::RateLimited
                } else {
                    FailureClassification::DuringBringUp
                },
                terminal: true,
                retry_in_ms: None,
            },
        );
        let _ = self.outbound.send(event).await;
    }
}

/// Primary connection with a one-time switch to a secondary data source
pub struct FallbackCoordinator {
    inner: Arc<Inner>,
    forwarder: JoinHandle<()>,
}

impl FallbackCoordinator {
    /// Spawn the primary manager and the event forwarder
    ///
    /// The primary options are forced onto [`FeedSource::Primary`] and the
    /// secondary options onto [`FeedSource::Fallback`]. `engaged` is the
    /// one-time switch; when it is already set, only the secondary is spawned.
    pub fn spawn(
        primary: ManagerOptions,
        primary_factory: AdapterFactory,
        mut secondary: ManagerOptions,
        secondary_factory: AdapterFactory,
        detector: Arc<dyn RateLimitDetector>,
        engaged: Arc<AtomicBool>,
        outbound: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let buffer = primary.settings.event_buffer.max(1);
        let (internal_tx, internal_rx) = mpsc::channel(buffer);
        let platform = primary.platform;
        let instance = primary.instance;
        secondary.source = FeedSource::Fallback;

        let mut primary = primary;
        primary.source = FeedSource::Primary;
        primary.rate_limit = Some(detector.clone());
        if secondary.rate_limit.is_none() {
            secondary.rate_limit = Some(detector.clone());
        }

        let (manager, secondary) = if engaged.load(Ordering::Acquire) {
            debug!(%platform, "Fallback already engaged this session, starting on it");
            let manager = LifecycleManager::spawn(secondary, secondary_factory, internal_tx.clone());
            (manager, None)
        } else {
            let manager = LifecycleManager::spawn(primary, primary_factory, internal_tx.clone());
            let secondary = Secondary {
                options: secondary,
                factory: secondary_factory,
            };
            (manager, Some(secondary))
        };
        let inner = Arc::new(Inner {
            platform,
            active: Mutex::new(Arc::new(manager)),
            secondary: Mutex::new(secondary),
            engaged,
            closed: AtomicBool::new(false),
            detector,
            internal_tx,
            outbound,
        });

        let forwarder = tokio::spawn(Self::forward(inner.clone(), internal_rx, instance));

        Self { inner, forwarder }
    }

    /// Whether the switch to the secondary source has been used up
    pub fn is_engaged(&self) -> bool {
        self.inner.engaged.load(Ordering::Acquire)
    }

    /// Relay events of the active source; switch on the primary's rate-limit drop
    async fn forward(inner: Arc<Inner>, mut events: mpsc::Receiver<ConnectionEvent>, instance: u64) {
        while let Some(event) = events.recv().await {
            let active_source = inner.active().source();
            if event.source != active_source {
                debug!(
                    platform = %inner.platform,
                    source = %event.source,
                    "Dropping event from inactive source"
                );
                continue;
            }

            let rate_limited = matches!(
                event.kind,
                EventKind::Disconnected {
                    classification: FailureClassification::RateLimited,
                    ..
                }
            );
            if rate_limited && event.source == FeedSource::Primary && inner.engage() {
                warn!(
                    platform = %inner.platform,
                    "Primary source rate limited, switching to fallback"
                );
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(err) = inner.switch_to_secondary().await {
                        warn!(platform = %inner.platform, error = %err, "Fallback connect failed");
                        inner.report_secondary_failure(&err, instance).await;
                    }
                });
                continue;
            }

            if inner.outbound.send(event).await.is_err() {
                debug!(platform = %inner.platform, "Outbound receiver dropped");
                break;
            }
        }
    }
}

impl Drop for FallbackCoordinator {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl PlatformConnection for FallbackCoordinator {
    fn platform(&self) -> Platform {
        self.inner.platform
    }

    fn source(&self) -> FeedSource {
        self.inner.active().source()
    }

    async fn connect(&self) -> Result<ChannelInfo> {
        self.inner.closed.store(false, Ordering::Release);
        let primary = self.inner.active();
        match primary.connect().await {
            Err(err)
                if primary.source() == FeedSource::Primary
                    && self.inner.detector.is_rate_limited(&err.reason_text())
                    && self.inner.engage() =>
            {
                warn!(
                    platform = %self.inner.platform,
                    error = %err,
                    "Primary source rate limited on connect, switching to fallback"
                );
                self.inner.switch_to_secondary().await
            }
            other => other,
        }
    }

    async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.active().disconnect().await;
    }

    fn state(&self) -> LifecycleState {
        self.inner.active().state()
    }

    fn retry_state(&self) -> RetryState {
        self.inner.active().retry_state()
    }
}
