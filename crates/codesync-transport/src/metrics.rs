//! Prometheus metrics for CodeSync
//!
//! Counters for connections, relayed traffic and saves, exposed in the
//! Prometheus text format over a minimal HTTP endpoint.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::coordinator::Observed;

/// CodeSync metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounterVec,
    pub connections_active: IntGaugeVec,

    // Room metrics
    pub rooms: IntGauge,
    pub participants: IntGauge,

    // Traffic metrics
    pub updates_relayed: IntCounter,
    pub updates_malformed: IntCounter,
    pub awareness_messages: IntCounter,
    pub cursor_messages: IntCounter,

    // Persistence metrics
    pub saves_total: IntCounter,
    pub save_failures: IntCounter,

    pub protocol_errors: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("codesync_connections_total", "Total number of connections"),
            &["transport"],
        )?;
        let connections_active = IntGaugeVec::new(
            Opts::new("codesync_connections_active", "Number of active connections"),
            &["transport"],
        )?;

        let rooms = IntGauge::new("codesync_rooms", "Rooms held in memory")?;
        let participants = IntGauge::new("codesync_participants", "Participants across all rooms")?;

        let updates_relayed = IntCounter::new("codesync_updates_relayed_total", "Document updates relayed")?;
        let updates_malformed = IntCounter::new(
            "codesync_updates_malformed_total",
            "Document updates the server replica could not apply",
        )?;
        let awareness_messages = IntCounter::new("codesync_awareness_messages_total", "Awareness updates received")?;
        let cursor_messages = IntCounter::new("codesync_cursor_messages_total", "Cursor positions received")?;

        let saves_total = IntCounter::new("codesync_saves_total", "Room snapshots saved")?;
        let save_failures = IntCounter::new("codesync_save_failures_total", "Room snapshot saves that failed")?;

        let protocol_errors = IntCounterVec::new(
            Opts::new("codesync_protocol_errors_total", "Frames rejected by the protocol layer"),
            &["code"],
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(rooms.clone()))?;
        registry.register(Box::new(participants.clone()))?;
        registry.register(Box::new(updates_relayed.clone()))?;
        registry.register(Box::new(updates_malformed.clone()))?;
        registry.register(Box::new(awareness_messages.clone()))?;
        registry.register(Box::new(cursor_messages.clone()))?;
        registry.register(Box::new(saves_total.clone()))?;
        registry.register(Box::new(save_failures.clone()))?;
        registry.register(Box::new(protocol_errors.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            rooms,
            participants,
            updates_relayed,
            updates_malformed,
            awareness_messages,
            cursor_messages,
            saves_total,
            save_failures,
            protocol_errors,
        })
    }

    pub(crate) fn record(&self, observed: Observed) {
        match observed {
            Observed::Connected(transport) => {
                self.connections_total.with_label_values(&[transport]).inc();
                self.connections_active.with_label_values(&[transport]).inc();
            }
            Observed::Disconnected(transport) => {
                self.connections_active.with_label_values(&[transport]).dec();
            }
            Observed::Relayed { applied } => {
                self.updates_relayed.inc();
                if !applied {
                    self.updates_malformed.inc();
                }
            }
            Observed::Awareness => self.awareness_messages.inc(),
            Observed::Cursor => self.cursor_messages.inc(),
            Observed::Saved => self.saves_total.inc(),
            Observed::SaveFailed => self.save_failures.inc(),
            Observed::ProtocolError(code) => {
                self.protocol_errors.with_label_values(&[code]).inc();
            }
        }
    }

    /// Update room and participant gauges
    pub fn set_room_counts(&self, rooms: usize, participants: usize) {
        self.rooms.set(rooms as i64);
        self.participants.set(participants as i64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// HTTP server for the metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Metrics server listening on http://{}/metrics", self.addr);

        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let n = match stream.read(&mut buf).await {
                            Ok(n) if n > 0 => n,
                            _ => return,
                        };
                        let request = String::from_utf8_lossy(&buf[..n]);
                        let response = respond(&request, &metrics);
                        let _ = stream.write_all(response.as_bytes()).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

fn respond(request: &str, metrics: &Metrics) -> String {
    if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
        let body = metrics.export();
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            body.len(),
            body
        )
    } else if request.starts_with("GET /health") {
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK".to_string()
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
    }
}
