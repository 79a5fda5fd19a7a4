//! # chat_tail
//!
//! Connects one session to one or more platforms and prints every unified
//! event as a JSON line on stdout. Logs go to stderr.
//!
//! ```text
//! chat_tail twitch:somestreamer youtube:https://youtu.be/dQw4w9WgXcQ
//! RUST_LOG=adapter_service=debug chat_tail --config chatmux.toml tiktok:@someone
//! ```
//!
//! Only Twitch ships with a bundled client; the other platforms fail their
//! precondition check unless a client provider for them is linked in.

use adapter_service::{ActiveConnections, BundledClients, ConnectOptions, SessionRouter};
use anyhow::{anyhow, Context, Result};
use chatmux_config::load_config;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Platform;

#[derive(Debug, Parser)]
#[command(name = "chat_tail", about = "Tail live chat from one or more platforms")]
struct Args {
    /// Connections as `platform:target`, e.g. `twitch:somestreamer`
    #[arg(required = true)]
    targets: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override every platform's retry budget
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Do not reconnect after drops
    #[arg(long)]
    no_reconnect: bool,

    /// Never switch TikTok to the fallback source
    #[arg(long)]
    no_fallback: bool,
}

fn parse_target(raw: &str) -> Result<(Platform, String)> {
    let (platform, target) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected platform:target, got '{}'", raw))?;
    let platform = platform
        .parse::<Platform>()
        .with_context(|| format!("in '{}'", raw))?;
    Ok((platform, target.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let targets = args
        .targets
        .iter()
        .map(|raw| parse_target(raw))
        .collect::<Result<Vec<_>>>()?;

    let config = Arc::new(load_config(args.config.as_deref()).context("Failed to load configuration")?);
    let clients = Arc::new(BundledClients::new(config.twitch.clone()));
    let counter = Arc::new(ActiveConnections::new());
    let (router, mut events) = SessionRouter::new(
        format!("chat_tail-{}", std::process::id()),
        config,
        clients,
        counter.clone(),
    );

    let options = ConnectOptions {
        max_attempts: args.max_attempts,
        auto_reconnect: !args.no_reconnect,
        fallback: args.no_fallback.then_some(false),
    };

    let mut connected = 0usize;
    for (platform, target) in &targets {
        match router.connect(*platform, target, options).await {
            Ok(info) => {
                connected += 1;
                info!(
                    %platform,
                    target = %info.target,
                    source = %info.source,
                    room = info.room_id.as_deref().unwrap_or("-"),
                    "Connected"
                );
            }
            Err(e) => error!(%platform, %target, error = %e, "Connect failed"),
        }
    }
    if connected == 0 {
        return Err(anyhow!("no platform could be connected"));
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }

        if router.states().is_empty() {
            info!("No connections left");
            break;
        }
    }

    router.shutdown().await;
    info!(active = counter.get(), "Stopped");
    Ok(())
}
