//! CodeSync Transport Layer
//!
//! Connection lifecycle and network transports:
//! - Coordinator: joins, leaves, disconnects, room seeding, saves
//! - TCP: newline-delimited JSON
//! - WebSocket: browser-compatible transport, one message per text frame
//! - Metrics: Prometheus metrics (optional feature)

pub mod coordinator;
pub mod handler;
pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;
#[cfg(feature = "metrics")]
pub mod metrics;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats, Outbox};
pub use handler::ConnectionHandler;
pub use tcp::TcpServer;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};
