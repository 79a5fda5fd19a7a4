//! Scripted doubles for unit tests

use crate::input::{
    AdapterEvent, AdapterFactory, ClientProvider, ClientSignal, PlatformAdapter, PlatformClient,
    ReadyInfo,
};
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use types::{ConnectionTarget, FeedSource, Platform};

/// How the next adapter's `open` behaves
#[derive(Debug, Clone)]
pub(crate) enum OpenPlan {
    Ready,
    Fail(String),
    Hang,
    MissingPrecondition(String),
}

/// Hands out scripted adapters and the senders feeding their event streams
pub(crate) struct Harness {
    platform: Platform,
    plans: Arc<Mutex<VecDeque<OpenPlan>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    feeds_tx: mpsc::UnboundedSender<mpsc::Sender<AdapterEvent>>,
    feeds_rx: mpsc::UnboundedReceiver<mpsc::Sender<AdapterEvent>>,
}

impl Harness {
    pub(crate) fn new(platform: Platform) -> Self {
        let (feeds_tx, feeds_rx) = mpsc::unbounded_channel();
        Self {
            platform,
            plans: Arc::new(Mutex::new(VecDeque::new())),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            feeds_tx,
            feeds_rx,
        }
    }

    /// Queue the behaviour of the next adapter; unqueued adapters open fine
    pub(crate) fn push(&self, plan: OpenPlan) {
        self.plans.lock().push_back(plan);
    }

    pub(crate) fn factory(&self) -> AdapterFactory {
        let platform = self.platform;
        let plans = self.plans.clone();
        let opens = self.opens.clone();
        let closes = self.closes.clone();
        let feeds = self.feeds_tx.clone();
        Arc::new(move || -> Box<dyn PlatformAdapter> {
            Box::new(ScriptedAdapter {
                platform,
                plan: plans.lock().pop_front().unwrap_or(OpenPlan::Ready),
                opens: opens.clone(),
                closes: closes.clone(),
                feeds: feeds.clone(),
                events: None,
            })
        })
    }

    /// Sender feeding the most recently opened adapter, in open order
    pub(crate) async fn next_feed(&mut self) -> mpsc::Sender<AdapterEvent> {
        self.feeds_rx.recv().await.expect("harness outlives its adapters")
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedAdapter {
    platform: Platform,
    plan: OpenPlan,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    feeds: mpsc::UnboundedSender<mpsc::Sender<AdapterEvent>>,
    events: Option<mpsc::Receiver<AdapterEvent>>,
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn check_preconditions(&self) -> Result<()> {
        match &self.plan {
            OpenPlan::MissingPrecondition(reason) => Err(LifecycleError::Precondition {
                platform: self.platform,
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    async fn open(&mut self, _target: &ConnectionTarget) -> Result<ReadyInfo> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.plan.clone() {
            OpenPlan::Ready | OpenPlan::MissingPrecondition(_) => {
                let (tx, rx) = mpsc::channel(64);
                self.events = Some(rx);
                let _ = self.feeds.send(tx);
                Ok(ReadyInfo {
                    title: Some("scripted".to_string()),
                    room_id: Some("room-1".to_string()),
                    via_content: false,
                })
            }
            OpenPlan::Fail(reason) => Err(LifecycleError::Handshake {
                platform: self.platform,
                reason,
            }),
            OpenPlan::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events = None;
    }

    fn events(&mut self) -> Option<mpsc::Receiver<AdapterEvent>> {
        self.events.take()
    }
}

/// Client that replays a fixed signal script after the handshake
pub(crate) struct ScriptedClient {
    script: Vec<ClientSignal>,
    reject: Option<String>,
    tx: mpsc::Sender<ClientSignal>,
    rx: Option<mpsc::Receiver<ClientSignal>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub(crate) fn new(script: Vec<ClientSignal>, closes: Arc<AtomicUsize>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            script,
            reject: None,
            tx,
            rx: Some(rx),
            closes,
        }
    }

    pub(crate) fn rejecting(reason: &str, closes: Arc<AtomicUsize>) -> Self {
        Self {
            reject: Some(reason.to_string()),
            ..Self::new(Vec::new(), closes)
        }
    }

    /// Sender for signals injected after the script
    pub(crate) fn sender(&self) -> mpsc::Sender<ClientSignal> {
        self.tx.clone()
    }
}

#[async_trait]
impl PlatformClient for ScriptedClient {
    fn take_signals(&mut self) -> Option<mpsc::Receiver<ClientSignal>> {
        self.rx.take()
    }

    async fn handshake(&mut self, target: &ConnectionTarget) -> Result<()> {
        if let Some(reason) = &self.reject {
            return Err(LifecycleError::Handshake {
                platform: target.platform(),
                reason: reason.clone(),
            });
        }
        for signal in self.script.drain(..) {
            let _ = self.tx.send(signal).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider handing out queued scripted clients in order
#[derive(Default)]
pub(crate) struct ScriptedClients {
    queue: Mutex<VecDeque<ScriptedClient>>,
}

impl ScriptedClients {
    pub(crate) fn push(&self, client: ScriptedClient) {
        self.queue.lock().push_back(client);
    }
}

impl ClientProvider for ScriptedClients {
    fn client(&self, platform: Platform, source: FeedSource) -> Result<Box<dyn PlatformClient>> {
        match self.queue.lock().pop_front() {
            Some(client) => Ok(Box::new(client)),
            None => Err(LifecycleError::Precondition {
                platform,
                reason: format!("no scripted client for {}", source),
            }),
        }
    }
}
