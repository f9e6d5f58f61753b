//! Headless sync client.
//!
//! Usage:
//!   cargo run -p netsync_client -- [--listen 127.0.0.1:40100] [--tick-hz 60] [--config sync.json]
//!
//! Listens for sync messages over UDP and reconciles them against an
//! in-memory engine. Useful for replaying captured traffic and watching the
//! reconciliation logs (`RUST_LOG=netsync_client=debug`).

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use netsync_client::{
    engine::HeadlessEngine,
    feed::{spawn_feed, UdpSnapshotSource},
    weapons::Unarmed,
    SyncSession,
};
use netsync_shared::config::SyncConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();

    // Config file first so explicit flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            SyncConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        _ => SyncConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let listen: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
    info!(listen = %listen, tick_hz = cfg.tick_hz, "Starting sync client");

    let engine = Arc::new(HeadlessEngine::new());
    let tick = Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1) as f32);
    let mut session = SyncSession::new(cfg, engine.clone(), Arc::new(Unarmed));

    let source = UdpSnapshotSource::bind(listen).await?;
    let feed = spawn_feed(source, session.inbound());

    let mut interval = tokio::time::interval(tick);
    let mut last = Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let now = Instant::now();
        session.process_inbound(now);
        if let Some(reason) = session.disconnect_reason() {
            info!(%reason, "disconnected");
            break;
        }
        session.tick(now);
        engine.step(now.duration_since(last).as_secs_f32());
        last = now;
    }

    feed.abort();
    session.teardown();
    Ok(())
}
