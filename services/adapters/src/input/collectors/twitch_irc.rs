//! Anonymous Twitch chat client
//!
//! Connects to Twitch IRC over WebSocket with a `justinfan` login, which
//! grants read-only access without credentials. Every relevant IRC line is
//! reported as a [`ClientSignal`] carrying a JSON rendering of the line.

use crate::input::{ClientSignal, PlatformClient};
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use types::{ConnectionTarget, Platform};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const SIGNAL_BUFFER: usize = 512;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const RELAYED_COMMANDS: [&str; 4] = ["PRIVMSG", "USERNOTICE", "CLEARCHAT", "CLEARMSG"];
const FATAL_NOTICES: [&str; 4] = [
    "msg_channel_suspended",
    "msg_banned",
    "msg_channel_blocked",
    "tos_ban",
];

/// One parsed IRC line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    /// IRCv3 tags, unescaped
    pub tags: HashMap<String, String>,
    /// Source prefix (`nick!user@host`)
    pub prefix: Option<String>,
    /// Command or numeric
    pub command: String,
    /// Parameters, trailing parameter last
    pub params: Vec<String>,
}

impl IrcLine {
    /// Parse a single line; `None` for empty or malformed input
    pub fn parse(raw: &str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, after) = tagged.split_once(' ')?;
            for pair in raw_tags.split(';').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                tags.insert(key.to_string(), unescape_tag(value));
            }
            rest = after.trim_start();
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (source, after) = prefixed.split_once(' ')?;
            prefix = Some(source.to_string());
            rest = after.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut parts = head.split_whitespace();
        let command = parts.next()?.to_string();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nick part of the prefix
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty() && !n.contains('.'))
    }

    /// Channel parameter without the `#`
    pub fn channel(&self) -> Option<&str> {
        self.params
            .first()
            .and_then(|p| p.strip_prefix('#'))
    }

    /// JSON rendering handed to the translator
    pub fn to_payload(&self) -> Value {
        json!({
            "command": self.command,
            "tags": self.tags,
            "nick": self.nick(),
            "channel": self.channel(),
            "text": self.params.get(1),
        })
    }
}

/// Undo IRCv3 tag value escaping
pub fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Read-only Twitch IRC client
pub struct TwitchIrcClient {
    url: String,
    nick: String,
    signals_tx: mpsc::Sender<ClientSignal>,
    signals_rx: Option<mpsc::Receiver<ClientSignal>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TwitchIrcClient {
    /// Client for the given IRC-over-WebSocket endpoint
    pub fn new(url: impl Into<String>) -> Self {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_BUFFER);
        Self {
            url: url.into(),
            nick: format!("justinfan{}", rand::thread_rng().gen_range(10_000..100_000)),
            signals_tx,
            signals_rx: Some(signals_rx),
            shutdown: None,
            task: None,
        }
    }

    fn handshake_error(reason: impl Into<String>) -> LifecycleError {
        LifecycleError::Handshake {
            platform: Platform::Twitch,
            reason: reason.into(),
        }
    }

    /// Read frames until shutdown, the server closes, or the socket fails
    async fn read_loop(
        mut stream: WsStream,
        signals: mpsc::Sender<ClientSignal>,
        mut shutdown: oneshot::Receiver<()>,
        channel: String,
    ) {
        let mut ready_sent = false;

        loop {
            let frame = tokio::select! {
                _ = &mut shutdown => {
                    let _ = stream.send(Message::Close(None)).await;
                    debug!(channel = %channel, "Twitch client shut down");
                    return;
                }
                frame = stream.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    let _ = signals.send(ClientSignal::Closed(reason)).await;
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let _ = signals.send(ClientSignal::Fatal(e.to_string())).await;
                    return;
                }
                None => {
                    let _ = signals.send(ClientSignal::Closed(None)).await;
                    return;
                }
            };

            for raw in text.split("\r\n") {
                let Some(line) = IrcLine::parse(raw) else {
                    continue;
                };

                if line.command == "PING" {
                    let token = line.params.first().map(String::as_str).unwrap_or("tmi.twitch.tv");
                    if stream.send(Message::Text(format!("PONG :{}", token))).await.is_err() {
                        let _ = signals
                            .send(ClientSignal::Fatal("failed to answer PING".to_string()))
                            .await;
                        return;
                    }
                    continue;
                }
                let Some(signal) = line_signal(&line, &mut ready_sent) else {
                    continue;
                };
                if matches!(signal, ClientSignal::Ready(_)) {
                    info!(channel = %channel, "Joined Twitch channel");
                }

                let last = matches!(signal, ClientSignal::Fatal(_));
                if signals.send(signal).await.is_err() || last {
                    let _ = stream.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }
}

/// Signal for one non-PING line, `None` when the line is not reported
///
/// Ready is the first `ROOMSTATE`, which carries the room id. The `366` that
/// precedes it has no tags and is ignored.
fn line_signal(line: &IrcLine, ready_sent: &mut bool) -> Option<ClientSignal> {
    match line.command.as_str() {
        "ROOMSTATE" if !*ready_sent => {
            *ready_sent = true;
            Some(ClientSignal::Ready(json!({
                "channel": line.channel(),
                "roomId": line.tags.get("room-id"),
            })))
        }
        "RECONNECT" => Some(ClientSignal::Fatal("server requested reconnect".to_string())),
        "NOTICE" => {
            let msg_id = line.tags.get("msg-id").map(String::as_str).unwrap_or("");
            let text = line.params.last().cloned().unwrap_or_default();
            if FATAL_NOTICES.contains(&msg_id) || text.contains("authentication failed") {
                Some(ClientSignal::Fatal(text))
            } else {
                debug!(msg_id, text = %text, "Twitch notice");
                None
            }
        }
        command if RELAYED_COMMANDS.contains(&command) => Some(ClientSignal::Content {
            event: command.to_string(),
            payload: line.to_payload(),
        }),
        _ => None,
    }
}

#[async_trait]
impl PlatformClient for TwitchIrcClient {
    fn take_signals(&mut self) -> Option<mpsc::Receiver<ClientSignal>> {
        self.signals_rx.take()
    }

    async fn handshake(&mut self, target: &ConnectionTarget) -> Result<()> {
        if self.task.is_some() {
            return Err(Self::handshake_error("client already connected"));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| LifecycleError::Configuration(format!("Invalid Twitch URL: {}", e)))?;

        info!(url = %url, target = target.as_str(), "Connecting to Twitch chat");
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Self::handshake_error(format!("Connection failed: {}", e)))?;

        let channel = target.as_str().to_string();
        for line in [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            "PASS SCHMOOPIIE".to_string(),
            format!("NICK {}", self.nick),
            format!("JOIN #{}", channel),
        ] {
            ws.send(Message::Text(line)).await?;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(Self::read_loop(
            ws,
            self.signals_tx.clone(),
            shutdown_rx,
            channel,
        )));

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("Twitch reader did not stop in time, aborting");
                task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for TwitchIrcClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_privmsg() {
        let raw = "@badge-info=subscriber/14;badges=subscriber/12,premium/1;color=#1E90FF;\
                   display-name=Viewer;id=abc-123;mod=0;room-id=555;subscriber=1;\
                   tmi-sent-ts=1700000000123;user-id=42 \
                   :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #streamer :hello there :)";
        let line = IrcLine::parse(raw).unwrap();

        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.nick(), Some("viewer"));
        assert_eq!(line.channel(), Some("streamer"));
        assert_eq!(line.params, vec!["#streamer", "hello there :)"]);
        assert_eq!(line.tags["display-name"], "Viewer");
        assert_eq!(line.tags["badges"], "subscriber/12,premium/1");

        let payload = line.to_payload();
        assert_eq!(payload["text"], "hello there :)");
        assert_eq!(payload["nick"], "viewer");
    }

    #[test]
    fn parses_untagged_commands() {
        let ping = IrcLine::parse("PING :tmi.twitch.tv\r\n").unwrap();
        assert_eq!(ping.command, "PING");
        assert_eq!(ping.params, vec!["tmi.twitch.tv"]);
        assert_eq!(ping.nick(), None);

        let numeric = IrcLine::parse(":tmi.twitch.tv 366 justinfan123 #chan :End of /NAMES list").unwrap();
        assert_eq!(numeric.command, "366");
        assert_eq!(numeric.prefix.as_deref(), Some("tmi.twitch.tv"));
        assert_eq!(numeric.nick(), None);

        assert!(IrcLine::parse("").is_none());
        assert!(IrcLine::parse("\r\n").is_none());
    }

    #[test]
    fn roomstate_signals_ready_once() {
        let mut ready_sent = false;
        let names_end = IrcLine::parse(":justinfan123.tmi.twitch.tv 366 justinfan123 #chan :End of /NAMES list").unwrap();
        assert!(line_signal(&names_end, &mut ready_sent).is_none());
        assert!(!ready_sent);

        let roomstate = IrcLine::parse("@emote-only=0;room-id=555;subs-only=0 :tmi.twitch.tv ROOMSTATE #chan").unwrap();
        match line_signal(&roomstate, &mut ready_sent) {
            Some(ClientSignal::Ready(payload)) => {
                assert_eq!(payload["roomId"], "555");
                assert_eq!(payload["channel"], "chan");
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert!(ready_sent);

        // Mode changes later in the session re-send ROOMSTATE.
        assert!(line_signal(&roomstate, &mut ready_sent).is_none());
    }

    #[test]
    fn classifies_session_lines() {
        let mut ready_sent = true;

        let banned = IrcLine::parse("@msg-id=msg_banned :tmi.twitch.tv NOTICE #chan :You are permanently banned.").unwrap();
        assert!(matches!(line_signal(&banned, &mut ready_sent), Some(ClientSignal::Fatal(_))));

        let chatter = IrcLine::parse("@msg-id=slow_on :tmi.twitch.tv NOTICE #chan :This room is now in slow mode.").unwrap();
        assert!(line_signal(&chatter, &mut ready_sent).is_none());

        let reconnect = IrcLine::parse(":tmi.twitch.tv RECONNECT").unwrap();
        assert!(matches!(line_signal(&reconnect, &mut ready_sent), Some(ClientSignal::Fatal(_))));

        let privmsg = IrcLine::parse(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :hi").unwrap();
        match line_signal(&privmsg, &mut ready_sent) {
            Some(ClientSignal::Content { event, payload }) => {
                assert_eq!(event, "PRIVMSG");
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("expected Content, got {:?}", other),
        }
    }

    #[test]
    fn unescapes_tag_values() {
        assert_eq!(unescape_tag(r"Thanks\sfor\sthe\sraid\:\s10\\10"), "Thanks for the raid; 10\\10");
        assert_eq!(unescape_tag("plain"), "plain");
        assert_eq!(unescape_tag("trailing\\"), "trailing");
    }

    #[test]
    fn anonymous_nick_and_single_signal_take() {
        let mut client = TwitchIrcClient::new("wss://irc-ws.chat.twitch.tv:443");
        assert!(client.nick.starts_with("justinfan"));
        assert!(client.take_signals().is_some());
        assert!(client.take_signals().is_none());
    }
}
