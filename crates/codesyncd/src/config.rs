//! Daemon configuration: command line and environment over an optional TOML file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_TCP_PORT: u16 = 4380;
pub const DEFAULT_WS_PORT: u16 = 4381;
pub const DEFAULT_STORE: &str = "memory:";

/// CodeSync Daemon - real-time collaborative editing server
#[derive(Parser, Debug, Default)]
#[command(name = "codesyncd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CODESYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "CODESYNC_BIND")]
    pub bind: Option<String>,

    /// TCP port to listen on [default: 4380]
    #[arg(long, env = "CODESYNC_TCP_PORT")]
    pub tcp_port: Option<u16>,

    /// WebSocket port to listen on [default: 4381]
    #[arg(long, env = "CODESYNC_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Disable TCP server
    #[arg(long)]
    pub no_tcp: bool,

    /// Disable WebSocket server
    #[arg(long)]
    pub no_ws: bool,

    /// Durable store: memory:, sqlite::memory:, sqlite://<path> or postgres://...
    #[arg(long, env = "CODESYNC_STORE")]
    pub store: Option<String>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "CODESYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "CODESYNC_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Evict rooms that have been empty for this many seconds
    #[arg(long, env = "CODESYNC_EVICT_IDLE_AFTER")]
    pub evict_idle_after: Option<u64>,

    /// Keep awareness state of disconnected clients
    #[arg(long, env = "CODESYNC_KEEP_AWARENESS")]
    pub keep_awareness: bool,
}

/// Contents of the TOML configuration file
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub tcp_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub no_tcp: Option<bool>,
    pub no_ws: Option<bool>,
    pub store: Option<String>,
    pub log_level: Option<String>,
    pub metrics_port: Option<u16>,
    pub evict_idle_after_secs: Option<u64>,
    pub prune_awareness_on_disconnect: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Effective settings after layering
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    pub tcp_port: u16,
    pub ws_port: u16,
    pub tcp_enabled: bool,
    pub ws_enabled: bool,
    pub store: String,
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub evict_idle_after: Option<Duration>,
    pub prune_awareness_on_disconnect: bool,
}

impl Settings {
    /// Read the config file named by `args`, if any, and layer `args` over it
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(args, file))
    }

    /// Command line over file over defaults
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        Self {
            bind: args.bind.clone().or(file.bind).unwrap_or_else(|| "0.0.0.0".into()),
            tcp_port: args.tcp_port.or(file.tcp_port).unwrap_or(DEFAULT_TCP_PORT),
            ws_port: args.ws_port.or(file.ws_port).unwrap_or(DEFAULT_WS_PORT),
            tcp_enabled: !(args.no_tcp || file.no_tcp.unwrap_or(false)),
            ws_enabled: !(args.no_ws || file.no_ws.unwrap_or(false)),
            store: args
                .store
                .clone()
                .or(file.store)
                .unwrap_or_else(|| DEFAULT_STORE.into()),
            log_level: args
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".into()),
            metrics_port: args.metrics_port.or(file.metrics_port),
            evict_idle_after: args
                .evict_idle_after
                .or(file.evict_idle_after_secs)
                .map(Duration::from_secs),
            prune_awareness_on_disconnect: !args.keep_awareness
                && file.prune_awareness_on_disconnect.unwrap_or(true),
        }
    }
}
