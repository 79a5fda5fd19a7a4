//! The lifecycle task
//!
//! Sole writer of connection state (apart from the handle's disconnect veto).
//! Every wait point also listens on the command channel, so a disconnect
//! interrupts an open, a live connection or a backoff sleep alike.

use super::{LifecycleState, ManagerOptions, Shared};
use crate::backoff::BackoffPolicy;
use crate::input::{AdapterEvent, AdapterFactory, PlatformAdapter, ReadyInfo};
use crate::rate_limit::RateLimitDetector;
use crate::stability::StabilityWindow;
use crate::{LifecycleError, Result};
use chatmux_config::LifecycleSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use types::{
    ChannelInfo, ConnectionEvent, ConnectionTarget, EventKind, FailureClassification, FeedSource,
    Platform,
};

/// Requests from the handle
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<ChannelInfo>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// What the idle loop does next
enum Flow {
    Continue,
    Stop,
}

/// A disconnect request, or `None` when every handle is gone
struct Interrupt(Option<oneshot::Sender<()>>);

impl Interrupt {
    fn finish(self) -> Flow {
        match self.0 {
            Some(done) => {
                let _ = done.send(());
                Flow::Continue
            }
            None => Flow::Stop,
        }
    }
}

enum Attempt {
    Opened {
        adapter: Box<dyn PlatformAdapter>,
        info: ChannelInfo,
        events: mpsc::Receiver<AdapterEvent>,
    },
    Failed(LifecycleError),
    Interrupted(Interrupt),
}

enum LiveEnd {
    Dropped(String),
    StreamEnded,
    Interrupted(Interrupt),
}

pub(crate) struct Machine {
    platform: Platform,
    source: FeedSource,
    instance: u64,
    target: ConnectionTarget,
    settings: LifecycleSettings,
    auto_reconnect: bool,
    detector: Option<Arc<dyn RateLimitDetector>>,
    backoff: BackoffPolicy,
    window: StabilityWindow,
    factory: AdapterFactory,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    shared: Arc<Shared>,
    epoch: Instant,
}

impl Machine {
    pub(crate) fn new(
        options: ManagerOptions,
        factory: AdapterFactory,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<ConnectionEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            platform: options.platform,
            source: options.source,
            instance: options.instance,
            backoff: BackoffPolicy::from_settings(&options.settings),
            window: StabilityWindow::from_settings(&options.settings),
            target: options.target,
            settings: options.settings,
            auto_reconnect: options.auto_reconnect,
            detector: options.rate_limit,
            factory,
            commands,
            events,
            shared,
            epoch: Instant::now(),
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            let flow = match command {
                Command::Connect { reply } => self.connect(reply).await,
                Command::Disconnect { done } => {
                    let _ = done.send(());
                    Flow::Continue
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        debug!(
            platform = %self.platform,
            source = %self.source,
            instance = self.instance,
            "Lifecycle task stopped"
        );
    }

    async fn connect(&mut self, reply: oneshot::Sender<Result<ChannelInfo>>) -> Flow {
        self.shared.reset_retry(self.backoff.initial());
        self.shared.transition(LifecycleState::Connecting);
        info!(
            platform = %self.platform,
            source = %self.source,
            target = self.target.as_str(),
            "Connecting"
        );

        match self.attempt().await {
            Attempt::Opened {
                adapter,
                info,
                events,
            } => {
                let _ = reply.send(Ok(info.clone()));
                self.session(adapter, events, info).await
            }
            Attempt::Failed(err) => {
                warn!(
                    platform = %self.platform,
                    source = %self.source,
                    error = %err,
                    "Connect failed"
                );
                self.shared
                    .transition(LifecycleState::Disconnected(err.reason_text()));
                let _ = reply.send(Err(err));
                Flow::Continue
            }
            Attempt::Interrupted(interrupt) => {
                let _ = reply.send(Err(LifecycleError::Cancelled {
                    platform: self.platform,
                }));
                interrupt.finish()
            }
        }
    }

    /// One open attempt on a fresh adapter, bounded by the platform timeout
    async fn attempt(&mut self) -> Attempt {
        let mut adapter = (self.factory)();
        if let Err(err) = adapter.check_preconditions() {
            return Attempt::Failed(err);
        }

        let open_timeout = self.settings.open_timeout(self.platform);
        let target = self.target.clone();
        let outcome = {
            let open = tokio::time::timeout(open_timeout, adapter.open(&target));
            tokio::pin!(open);
            loop {
                tokio::select! {
                    result = &mut open => break Ok(result),
                    command = self.commands.recv() => match command {
                        Some(Command::Connect { reply }) => {
                            let _ = reply.send(Err(self.already_active()));
                        }
                        Some(Command::Disconnect { done }) => break Err(Interrupt(Some(done))),
                        None => break Err(Interrupt(None)),
                    },
                }
            }
        };

        match outcome {
            Ok(Ok(Ok(ready))) => match adapter.events() {
                Some(events) => Attempt::Opened {
                    info: self.channel_info(ready),
                    adapter,
                    events,
                },
                None => {
                    self.close_adapter(&mut adapter).await;
                    Attempt::Failed(LifecycleError::Handshake {
                        platform: self.platform,
                        reason: "adapter produced no event stream".to_string(),
                    })
                }
            },
            Ok(Ok(Err(err))) => {
                self.close_adapter(&mut adapter).await;
                Attempt::Failed(err)
            }
            Ok(Err(_elapsed)) => {
                self.close_adapter(&mut adapter).await;
                Attempt::Failed(LifecycleError::HandshakeTimeout {
                    platform: self.platform,
                    timeout_ms: open_timeout.as_millis() as u64,
                })
            }
            Err(interrupt) => {
                self.close_adapter(&mut adapter).await;
                Attempt::Interrupted(interrupt)
            }
        }
    }

    /// Run an opened connection, reconnecting after stable drops
    async fn session(
        &mut self,
        mut adapter: Box<dyn PlatformAdapter>,
        mut events: mpsc::Receiver<AdapterEvent>,
        mut info: ChannelInfo,
    ) -> Flow {
        let mut reconnected = false;

        loop {
            let connected_at = self.now_ms();
            self.shared.transition(LifecycleState::Verifying);
            info!(
                platform = %self.platform,
                source = %self.source,
                target = self.target.as_str(),
                reconnected,
                "Connection opened"
            );
            let channel_info = info.clone();
            let opened = if reconnected {
                EventKind::Reconnected { channel_info }
            } else {
                EventKind::Connected { channel_info }
            };
            if let Some(interrupt) = self.emit(opened).await {
                self.close_adapter(&mut adapter).await;
                return interrupt.finish();
            }

            let end = self.live(&mut events).await;
            self.close_adapter(&mut adapter).await;

            let reason = match end {
                LiveEnd::Interrupted(interrupt) => return interrupt.finish(),
                LiveEnd::StreamEnded => {
                    info!(platform = %self.platform, target = self.target.as_str(), "Stream ended");
                    self.shared
                        .transition(LifecycleState::Disconnected("Stream ended".to_string()));
                    return Flow::Continue;
                }
                LiveEnd::Dropped(reason) => reason,
            };

            let now = self.now_ms();
            if self.window.is_confirmed(connected_at, now) {
                self.shared.reset_retry(self.backoff.initial());
            }
            let classification = self.window.classify_failure(
                Some(connected_at),
                now,
                &reason,
                self.detector.as_deref(),
            );

            if !(classification.is_retryable() && self.auto_reconnect) {
                warn!(
                    platform = %self.platform,
                    source = %self.source,
                    ?classification,
                    uptime_ms = now.saturating_sub(connected_at),
                    reason = %reason,
                    "Connection lost, not retrying"
                );
                return self
                    .finish(LifecycleState::Disconnected(reason.clone()), reason, classification)
                    .await;
            }

            let backoff = self.backoff;
            let attempt = self
                .shared
                .record_attempt(|count| backoff.next(count.saturating_sub(1)));
            if attempt >= self.settings.max_attempts {
                let text = LifecycleError::RetriesExhausted {
                    platform: self.platform,
                    max_attempts: self.settings.max_attempts,
                    reason,
                }
                .to_string();
                error!(platform = %self.platform, source = %self.source, "{}", text);
                return self
                    .finish(LifecycleState::GivenUp(text.clone()), text, classification)
                    .await;
            }

            let delay = self.shared.retry().current_delay;
            self.shared.transition(LifecycleState::Reconnecting);
            warn!(
                platform = %self.platform,
                source = %self.source,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Connection lost, reconnecting"
            );
            let dropped = EventKind::Disconnected {
                reason_text: reason,
                classification,
                terminal: false,
                retry_in_ms: Some(delay.as_millis() as u64),
            };
            if let Some(interrupt) = self.emit(dropped).await {
                return interrupt.finish();
            }

            if let Some(interrupt) = self.wait(delay).await {
                return interrupt.finish();
            }
            if !self.shared.enabled() {
                debug!(platform = %self.platform, "Retry vetoed");
                return Flow::Continue;
            }

            self.shared.transition(LifecycleState::Connecting);
            match self.attempt().await {
                Attempt::Opened {
                    adapter: next_adapter,
                    info: next_info,
                    events: next_events,
                } => {
                    adapter = next_adapter;
                    events = next_events;
                    info = next_info;
                    reconnected = true;
                }
                Attempt::Failed(err) => {
                    let reason = err.reason_text();
                    let classification = self.window.classify_failure(
                        None,
                        self.now_ms(),
                        &reason,
                        self.detector.as_deref(),
                    );
                    let err = LifecycleError::UnstableBringUp {
                        platform: self.platform,
                        reason,
                    };
                    warn!(platform = %self.platform, source = %self.source, error = %err, "Giving up");
                    let reason = err.reason_text();
                    return self
                        .finish(LifecycleState::Disconnected(reason.clone()), reason, classification)
                        .await;
                }
                Attempt::Interrupted(interrupt) => return interrupt.finish(),
            }
        }
    }

    /// Relay adapter events until the connection ends
    async fn live(&mut self, events: &mut mpsc::Receiver<AdapterEvent>) -> LiveEnd {
        let verify = tokio::time::sleep(self.window.min_stable);
        let confirm = tokio::time::sleep(self.window.stable_confirm);
        tokio::pin!(verify);
        tokio::pin!(confirm);
        let mut verified = false;
        let mut confirmed = false;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        let _ = reply.send(Err(self.already_active()));
                    }
                    Some(Command::Disconnect { done }) => return LiveEnd::Interrupted(Interrupt(Some(done))),
                    None => return LiveEnd::Interrupted(Interrupt(None)),
                },
                _ = &mut verify, if !verified => {
                    verified = true;
                    self.promote();
                }
                _ = &mut confirm, if !confirmed => {
                    confirmed = true;
                    self.shared.reset_retry(self.backoff.initial());
                    debug!(platform = %self.platform, source = %self.source, "Connection stable, retry budget reset");
                }
                event = events.recv() => match event {
                    Some(AdapterEvent::Chat(message)) => {
                        if !verified {
                            verified = true;
                            self.promote();
                        }
                        if let Some(interrupt) = self.emit(EventKind::ChatMessage(message)).await {
                            return LiveEnd::Interrupted(interrupt);
                        }
                    }
                    Some(AdapterEvent::PlatformSpecific { name, payload }) => {
                        if !verified {
                            verified = true;
                            self.promote();
                        }
                        if let Some(interrupt) = self.emit(EventKind::PlatformSpecific { name, payload }).await {
                            return LiveEnd::Interrupted(interrupt);
                        }
                    }
                    Some(AdapterEvent::StreamEnded) => {
                        if let Some(interrupt) = self.emit(EventKind::StreamEnded {}).await {
                            return LiveEnd::Interrupted(interrupt);
                        }
                        return LiveEnd::StreamEnded;
                    }
                    Some(AdapterEvent::Fatal(reason)) => return LiveEnd::Dropped(reason),
                    None => return LiveEnd::Dropped("connection closed".to_string()),
                },
            }
        }
    }

    /// Sleep out the backoff; a disconnect cuts it short
    async fn wait(&mut self, delay: Duration) -> Option<Interrupt> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        let _ = reply.send(Err(self.already_active()));
                    }
                    Some(Command::Disconnect { done }) => return Some(Interrupt(Some(done))),
                    None => return Some(Interrupt(None)),
                },
            }
        }
    }

    /// Settle in a terminal state and report it
    async fn finish(
        &mut self,
        state: LifecycleState,
        reason: String,
        classification: FailureClassification,
    ) -> Flow {
        self.shared.transition(state);
        let terminal = EventKind::Disconnected {
            reason_text: reason,
            classification,
            terminal: true,
            retry_in_ms: None,
        };
        match self.emit(terminal).await {
            Some(interrupt) => interrupt.finish(),
            None => Flow::Continue,
        }
    }

    fn promote(&self) {
        if self.shared.promote() {
            debug!(platform = %self.platform, source = %self.source, "Connection verified");
        }
    }

    /// Deliver one event; a disconnect arriving while the receiver is full
    /// abandons the event and is returned to the caller
    async fn emit(&mut self, kind: EventKind) -> Option<Interrupt> {
        if !self.shared.enabled() {
            debug!(platform = %self.platform, "Suppressing event after disconnect");
            return None;
        }
        let event = ConnectionEvent::new(self.platform, self.source, self.instance, kind);
        let platform = self.platform;
        let send = self.events.send(event);
        tokio::pin!(send);
        loop {
            tokio::select! {
                biased;

                result = &mut send => {
                    if result.is_err() {
                        debug!(%platform, "Event receiver dropped");
                    }
                    return None;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        let _ = reply.send(Err(LifecycleError::AlreadyActive { platform }));
                    }
                    Some(Command::Disconnect { done }) => {
                        debug!(%platform, "Disconnect while blocked on a full event channel");
                        return Some(Interrupt(Some(done)));
                    }
                    None => return Some(Interrupt(None)),
                },
            }
        }
    }

    async fn close_adapter(&self, adapter: &mut Box<dyn PlatformAdapter>) {
        let close_timeout = self.settings.close_timeout();
        if tokio::time::timeout(close_timeout, adapter.close()).await.is_err() {
            warn!(
                platform = %self.platform,
                timeout_ms = close_timeout.as_millis() as u64,
                "Adapter close timed out"
            );
        }
    }

    fn channel_info(&self, ready: ReadyInfo) -> ChannelInfo {
        ChannelInfo {
            target: self.target.as_str().to_string(),
            source: self.source,
            title: ready.title,
            room_id: ready.room_id,
        }
    }

    fn already_active(&self) -> LifecycleError {
        LifecycleError::AlreadyActive {
            platform: self.platform,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
