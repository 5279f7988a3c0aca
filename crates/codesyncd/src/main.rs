//! CodeSync Daemon (codesyncd)
//!
//! The server process for CodeSync real-time collaborative editing.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (TCP on 4380, WebSocket on 4381, in-memory store)
//! codesyncd
//!
//! # Custom ports
//! codesyncd --tcp-port 7000 --ws-port 7001
//!
//! # With persistence
//! codesyncd --store sqlite:///var/lib/codesync/rooms.db
//!
//! # Evict rooms left empty for an hour, expose metrics
//! codesyncd --evict-idle-after 3600 --metrics-port 9380
//!
//! # With configuration file
//! codesyncd --config /etc/codesync/codesync.toml
//! ```

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use codesync_core::{DocumentEngine, RoomRegistry, YrsEngine};
use codesync_transport::{Coordinator, CoordinatorConfig, Metrics, MetricsServer, TcpServer, WebSocketServer};

use crate::config::{Args, Settings};

/// How often idle rooms are looked for, when eviction is enabled
const GC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args)?;

    // Initialize logging
    let level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let store = codesync_storage::open(&settings.store)
        .await
        .with_context(|| format!("opening store {}", settings.store))?;
    info!(store = %settings.store, "Durable store ready");

    let engine: Arc<dyn DocumentEngine> = Arc::new(YrsEngine);
    let registry = Arc::new(RoomRegistry::new(engine));
    let mut coordinator = Coordinator::new(registry, store).with_config(CoordinatorConfig {
        prune_awareness_on_disconnect: settings.prune_awareness_on_disconnect,
    });

    let mut handles = Vec::new();

    if let Some(port) = settings.metrics_port {
        let metrics = Arc::new(Metrics::new().context("registering metrics")?);
        coordinator = coordinator.with_metrics(metrics.clone());

        let addr: SocketAddr = format!("{}:{}", settings.bind, port).parse()?;
        let server = MetricsServer::new(metrics, addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Metrics server error");
            }
        }));
    }

    let coordinator = Arc::new(coordinator);

    info!(
        tcp_port = settings.tcp_port,
        ws_port = settings.ws_port,
        bind = %settings.bind,
        evict_idle_after = ?settings.evict_idle_after,
        prune_awareness = settings.prune_awareness_on_disconnect,
        "Starting CodeSync daemon"
    );

    // Start servers
    let mut transports = 0;

    if settings.tcp_enabled {
        let tcp_addr: SocketAddr = format!("{}:{}", settings.bind, settings.tcp_port).parse()?;
        let tcp_server = TcpServer::new(coordinator.clone(), tcp_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp_server.run().await {
                tracing::error!(error = %e, "TCP server error");
            }
        }));
        transports += 1;
    }

    if settings.ws_enabled {
        let ws_addr: SocketAddr = format!("{}:{}", settings.bind, settings.ws_port).parse()?;
        let ws_server = WebSocketServer::new(coordinator.clone(), ws_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                tracing::error!(error = %e, "WebSocket server error");
            }
        }));
        transports += 1;
    }

    if transports == 0 {
        anyhow::bail!("At least one transport must be enabled");
    }

    // Idle-room GC, only when eviction is configured
    if let Some(grace) = settings.evict_idle_after {
        let gc_coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(GC_INTERVAL.min(grace.max(Duration::from_secs(1))));
            loop {
                interval.tick().await;
                let evicted = gc_coordinator.evict_idle(grace);
                if !evicted.is_empty() {
                    tracing::debug!(rooms = ?evicted, "GC: evicted idle rooms");
                }
            }
        }));
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let stats = coordinator.stats();
    info!(rooms = stats.rooms, participants = stats.participants, "Final state");
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ╔═╗┌─┐┌┬┐┌─┐╔═╗┬ ┬┌┐┌┌─┐
  ║  │ │ ││├┤ ╚═╗└┬┘││││
  ╚═╝└─┘─┴┘└─┘╚═╝ ┴ ┘└┘└─┘
  Real-time collaborative editing
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
