//! Connection handler - decodes frames and dispatches them to the coordinator

use crate::coordinator::Coordinator;
use bytes::Bytes;
use codesync_core::ConnectionId;
use codesync_protocol::{decode_client, ClientMessage, FrameDecoder, ProtocolError, ServerMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles a single client connection
pub struct ConnectionHandler {
    /// Unique client ID
    pub connection_id: ConnectionId,
    coordinator: Arc<Coordinator>,
    /// Line framing for stream transports
    decoder: FrameDecoder,
}

impl ConnectionHandler {
    pub fn new(connection_id: ConnectionId, coordinator: Arc<Coordinator>) -> Self {
        Self {
            connection_id,
            coordinator,
            decoder: FrameDecoder::new(),
        }
    }

    /// Process raw bytes from a stream transport
    pub async fn process(&mut self, data: &[u8]) {
        if let Err(e) = self.decoder.feed(data) {
            self.reject(&e);
            return;
        }

        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => self.handle_frame(&frame).await,
                Ok(None) => break,
                Err(e) => self.reject(&e),
            }
        }
    }

    /// Handle one complete frame
    pub async fn handle_frame(&self, frame: &[u8]) {
        match decode_client(frame) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => self.reject(&e),
        }
    }

    /// Handle a single decoded message
    pub async fn handle_message(&self, message: ClientMessage) {
        debug!(client = %self.connection_id, kind = message.kind(), "Processing message");
        let id = &self.connection_id;

        match message {
            ClientMessage::JoinRoom { room_id, user } => {
                self.coordinator.join(id, &room_id, user).await;
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.coordinator.leave(id, &room_id);
            }
            ClientMessage::SyncUpdate { room_id, update } => {
                self.coordinator.relay_update(id, &room_id, Bytes::from(update));
            }
            ClientMessage::AwarenessUpdate { room_id, update } => {
                self.coordinator.set_awareness(id, &room_id, update);
            }
            ClientMessage::CursorPosition { room_id, position, user } => {
                self.coordinator.publish_cursor(id, &room_id, position, user);
            }
            ClientMessage::SaveRequest {
                room_id,
                content,
                language,
            } => {
                // Detached so a disconnect cannot cancel it
                let coordinator = self.coordinator.clone();
                tokio::spawn(async move {
                    let _ = coordinator.save(&room_id, &content, &language).await;
                });
            }
            ClientMessage::Ping => {
                self.coordinator.send(id, ServerMessage::Pong);
            }
        }
    }

    fn reject(&self, error: &ProtocolError) {
        warn!(client = %self.connection_id, code = error.code(), error = %error, "Rejected frame");
        self.coordinator
            .reject(&self.connection_id, error.code(), error.to_string());
    }

    /// Clean up when connection closes
    pub fn cleanup(&self) {
        self.coordinator.disconnect(&self.connection_id);
    }
}
