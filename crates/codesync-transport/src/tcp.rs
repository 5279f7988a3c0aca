//! TCP transport - newline-delimited JSON

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use codesync_core::ConnectionId;
use codesync_protocol::encode_line;

use crate::coordinator::Coordinator;
use crate::handler::ConnectionHandler;

/// TCP server for CodeSync
pub struct TcpServer {
    coordinator: Arc<Coordinator>,
    addr: SocketAddr,
    client_counter: AtomicU64,
}

impl TcpServer {
    pub fn new(coordinator: Arc<Coordinator>, addr: SocketAddr) -> Self {
        Self {
            coordinator,
            addr,
            client_counter: AtomicU64::new(0),
        }
    }

    /// Start the TCP server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "CodeSync TCP server listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let connection_id = ConnectionId::new(format!(
                        "tcp:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    ));
                    let coordinator = self.coordinator.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, connection_id.clone(), coordinator).await {
                            error!(client = %connection_id, error = %e, "Connection error");
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
        info!(client = %connection_id, "Client connected");

        let mut outbox = coordinator.connect(connection_id.clone());
        let mut handler = ConnectionHandler::new(connection_id.clone(), coordinator);
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; 8192];

        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = loop {
            tokio::select! {
                // Incoming data from the client
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            info!(client = %connection_id, "Client disconnected");
                            break Ok(());
                        }
                        Ok(n) => handler.process(&buf[..n]).await,
                        Err(e) => {
                            error!(client = %connection_id, error = %e, "Read error");
                            break Ok(());
                        }
                    }
                }

                // Messages queued for this client
                message = outbox.recv() => {
                    let Some(message) = message else { break Ok(()) };
                    let data = match encode_line(&message) {
                        Ok(data) => data,
                        Err(e) => {
                            error!(client = %connection_id, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = writer.write_all(&data).await {
                        break Err(e.into());
                    }
                }
            }
        };

        handler.cleanup();
        result
    }
}
