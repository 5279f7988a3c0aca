//! WebSocket transport - one JSON message per text frame

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

use codesync_core::ConnectionId;
use codesync_protocol::encode;

use crate::coordinator::Coordinator;
use crate::handler::ConnectionHandler;

/// WebSocket server for CodeSync
pub struct WebSocketServer {
    coordinator: Arc<Coordinator>,
    addr: SocketAddr,
    client_counter: AtomicU64,
}

impl WebSocketServer {
    pub fn new(coordinator: Arc<Coordinator>, addr: SocketAddr) -> Self {
        Self {
            coordinator,
            addr,
            client_counter: AtomicU64::new(0),
        }
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "CodeSync WebSocket server listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let connection_id = ConnectionId::new(format!(
                        "ws:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    ));
                    let coordinator = self.coordinator.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, connection_id.clone(), coordinator).await {
                            error!(client = %connection_id, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        connection_id: ConnectionId,
        coordinator: Arc<Coordinator>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        info!(client = %connection_id, "WebSocket client connected");

        let mut outbox = coordinator.connect(connection_id.clone());
        let handler = ConnectionHandler::new(connection_id.clone(), coordinator);

        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = loop {
            tokio::select! {
                // Incoming WebSocket messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handler.handle_frame(text.as_bytes()).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            // Some clients send JSON as binary frames
                            handler.handle_frame(&data).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(client = %connection_id, "WebSocket client disconnected");
                            break Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(client = %connection_id, error = %e, "WebSocket read error");
                            break Ok(());
                        }
                    }
                }

                // Messages queued for this client
                message = outbox.recv() => {
                    let Some(message) = message else { break Ok(()) };
                    let text = match encode(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(client = %connection_id, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        debug!(client = %connection_id, error = %e, "WebSocket write failed");
                        break Err(e.into());
                    }
                }
            }
        };

        handler.cleanup();
        result
    }
}
