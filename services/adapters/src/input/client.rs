//! Client-backed adapters
//!
//! A [`PlatformClient`] speaks one platform's wire protocol and reports raw
//! vendor payloads as [`ClientSignal`]s. A [`PlatformTranslator`] turns those
//! payloads into unified events. [`ClientAdapter`] glues the two together and
//! implements the open/close contract of [`PlatformAdapter`], so the per-platform
//! code only has to describe payload shapes.

use super::{AdapterEvent, PlatformAdapter, ReadyInfo};
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use types::{ConnectionTarget, FeedSource, Platform};

/// Capacity of the translated event channel handed to the lifecycle manager
const ADAPTER_EVENT_BUFFER: usize = 512;

/// Raw signal reported by a platform client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// Handshake settled; payload carries channel details
    Ready(Value),
    /// Vendor event
    Content {
        /// Vendor event name
        event: String,
        /// Vendor payload
        payload: Value,
    },
    /// Unrecoverable client failure
    Fatal(String),
    /// Transport closed, with the close reason when known
    Closed(Option<String>),
}

/// Wire-level client for one platform
#[async_trait]
pub trait PlatformClient: Send {
    /// Take the signal stream; called once, before `handshake`
    fn take_signals(&mut self) -> Option<mpsc::Receiver<ClientSignal>>;

    /// Start connecting to `target`
    ///
    /// Returning `Ok` only means the request went out; readiness is reported
    /// through [`ClientSignal::Ready`].
    async fn handshake(&mut self, target: &ConnectionTarget) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Supplies platform clients, keyed by platform and data source
pub trait ClientProvider: Send + Sync {
    /// Create a fresh client
    fn client(&self, platform: Platform, source: FeedSource) -> Result<Box<dyn PlatformClient>>;
}

/// Vendor payload knowledge for one platform
pub trait PlatformTranslator: Send + Sync + 'static {
    /// Platform the payloads come from
    fn platform(&self) -> Platform;

    /// Treat the first content event as readiness (platform has no ready signal)
    fn ready_on_first_content(&self) -> bool {
        false
    }

    /// Check local requirements
    fn check_preconditions(&self) -> Result<()> {
        Ok(())
    }

    /// Channel details from a ready payload, or from the first content payload
    fn ready_info(&self, payload: &Value) -> ReadyInfo {
        ReadyInfo {
            title: payload.get("title").and_then(super::collectors::value_string),
            room_id: payload.get("roomId").and_then(super::collectors::value_string),
            via_content: false,
        }
    }

    /// Translate one vendor event; `Ok(None)` for events we do not relay
    fn translate(&self, event: &str, payload: Value) -> Result<Option<AdapterEvent>>;
}

/// [`PlatformAdapter`] built from a client provider and a translator
pub struct ClientAdapter<T: PlatformTranslator> {
    translator: Arc<T>,
    clients: Arc<dyn ClientProvider>,
    source: FeedSource,
    client: Option<Box<dyn PlatformClient>>,
    events: Option<mpsc::Receiver<AdapterEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl<T: PlatformTranslator> ClientAdapter<T> {
    /// Create an unopened adapter
    pub fn new(translator: Arc<T>, clients: Arc<dyn ClientProvider>, source: FeedSource) -> Self {
        Self {
            translator,
            clients,
            source,
            client: None,
            events: None,
            pump: None,
        }
    }

    fn handshake_error(&self, reason: impl Into<String>) -> LifecycleError {
        LifecycleError::Handshake {
            platform: self.translator.platform(),
            reason: reason.into(),
        }
    }
}

fn translate_signal<T: PlatformTranslator>(
    translator: &T,
    event: &str,
    payload: Value,
) -> Option<AdapterEvent> {
    match translator.translate(event, payload) {
        Ok(translated) => translated,
        Err(e) => {
            warn!(
                platform = %translator.platform(),
                event,
                error = %e,
                "Dropping untranslatable payload"
            );
            None
        }
    }
}

#[async_trait]
impl<T: PlatformTranslator> PlatformAdapter for ClientAdapter<T> {
    fn platform(&self) -> Platform {
        self.translator.platform()
    }

    fn check_preconditions(&self) -> Result<()> {
        self.translator.check_preconditions()
    }

    async fn open(&mut self, target: &ConnectionTarget) -> Result<ReadyInfo> {
        if self.client.is_some() || self.pump.is_some() {
            return Err(LifecycleError::Client(
                "adapter instances are single use".to_string(),
            ));
        }

        let platform = self.translator.platform();
        let mut client = self.clients.client(platform, self.source)?;
        let mut signals = client
            .take_signals()
            .ok_or_else(|| self.handshake_error("client exposes no signal stream"))?;

        // Stored before the handshake so close() reaches it if open is cancelled.
        let client = self.client.insert(client);
        if let Err(e) = client.handshake(target).await {
            return Err(match e {
                LifecycleError::Precondition { .. } | LifecycleError::Handshake { .. } => e,
                other => self.handshake_error(other.reason_text()),
            });
        }

        let mut pending = Vec::new();
        let ready = loop {
            match signals.recv().await {
                Some(ClientSignal::Ready(payload)) => break self.translator.ready_info(&payload),
                Some(ClientSignal::Content { event, payload }) => {
                    let early_info = self
                        .translator
                        .ready_on_first_content()
                        .then(|| self.translator.ready_info(&payload));

                    match translate_signal(self.translator.as_ref(), &event, payload) {
                        Some(AdapterEvent::StreamEnded) => {
                            return Err(self.handshake_error("stream ended before ready"));
                        }
                        Some(AdapterEvent::Fatal(reason)) => return Err(self.handshake_error(reason)),
                        Some(translated) => {
                            let content = translated.is_content();
                            pending.push(translated);
                            if let (true, Some(info)) = (content, early_info) {
                                break ReadyInfo {
                                    via_content: true,
                                    ..info
                                };
                            }
                        }
                        None => {}
                    }
                }
                Some(ClientSignal::Fatal(reason)) => return Err(self.handshake_error(reason)),
                Some(ClientSignal::Closed(reason)) => {
                    return Err(self.handshake_error(
                        reason.unwrap_or_else(|| "closed during handshake".to_string()),
                    ));
                }
                None => return Err(self.handshake_error("client stopped before ready")),
            }
        };

        debug!(
            %platform,
            source = %self.source,
            target = target.as_str(),
            via_content = ready.via_content,
            buffered = pending.len(),
            "Handshake settled"
        );

        let (tx, rx) = mpsc::channel(ADAPTER_EVENT_BUFFER);
        let translator = self.translator.clone();
        self.pump = Some(tokio::spawn(async move {
            for event in pending {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            while let Some(signal) = signals.recv().await {
                let event = match signal {
                    ClientSignal::Ready(_) => continue,
                    ClientSignal::Content { event, payload } => {
                        match translate_signal(translator.as_ref(), &event, payload) {
                            Some(translated) => translated,
                            None => continue,
                        }
                    }
                    ClientSignal::Fatal(reason) => AdapterEvent::Fatal(reason),
                    ClientSignal::Closed(reason) => AdapterEvent::Fatal(
                        reason.unwrap_or_else(|| "connection closed".to_string()),
                    ),
                };

                let last = matches!(event, AdapterEvent::Fatal(_) | AdapterEvent::StreamEnded);
                if tx.send(event).await.is_err() || last {
                    return;
                }
            }

            let _ = tx
                .send(AdapterEvent::Fatal("client signal stream ended".to_string()))
                .await;
        }));
        self.events = Some(rx);

        Ok(ready)
    }

    async fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!(platform = %self.translator.platform(), error = %e, "Client close failed");
            }
        }
        self.events = None;
    }

    fn events(&mut self) -> Option<mpsc::Receiver<AdapterEvent>> {
        self.events.take()
    }
}

impl<T: PlatformTranslator> Drop for ClientAdapter<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
