//! Messages exchanged between clients and the server

use codesync_core::awareness::AwarenessEvent;
use codesync_core::{ConnectionId, CursorPosition, Participant, ParticipantInfo, RoomEvent, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a room (created on first join)
    JoinRoom { room_id: RoomId, user: ParticipantInfo },

    /// Leave a room without disconnecting
    LeaveRoom { room_id: RoomId },

    /// Document delta produced by the client's replica
    SyncUpdate { room_id: RoomId, update: Vec<u8> },

    /// Replace this connection's presence state
    AwarenessUpdate { room_id: RoomId, update: Value },

    CursorPosition {
        room_id: RoomId,
        position: CursorPosition,
        user: ParticipantInfo,
    },

    /// Persist the full linearized content of a room
    SaveRequest {
        room_id: RoomId,
        content: String,
        language: String,
    },

    Ping,
}

impl ClientMessage {
    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::SyncUpdate { .. } => "sync-update",
            ClientMessage::AwarenessUpdate { .. } => "awareness-update",
            ClientMessage::CursorPosition { .. } => "cursor-position",
            ClientMessage::SaveRequest { .. } => "save-request",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Messages the server sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full participant list of a room
    ParticipantsChanged {
        room_id: RoomId,
        participants: Vec<Participant>,
    },

    /// Persisted content for a joiner of an otherwise empty room
    RoomSnapshot {
        room_id: RoomId,
        content: String,
        language: String,
    },

    /// Live document state for a joiner of a room with peers
    RoomState {
        room_id: RoomId,
        state: Vec<u8>,
        language: String,
    },

    SyncUpdate { room_id: RoomId, update: Vec<u8> },

    AwarenessUpdate {
        room_id: RoomId,
        connection_id: ConnectionId,
        update: Value,
    },

    AwarenessJoined {
        room_id: RoomId,
        connection_id: ConnectionId,
    },

    AwarenessRemoved {
        room_id: RoomId,
        connection_id: ConnectionId,
    },

    RemoteCursor {
        room_id: RoomId,
        connection_id: ConnectionId,
        position: CursorPosition,
        user: ParticipantInfo,
    },

    Pong,

    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<RoomEvent> for ServerMessage {
    fn from(event: RoomEvent) -> Self {
        match event {
            RoomEvent::ParticipantsChanged { room_id, participants } => {
                ServerMessage::ParticipantsChanged { room_id, participants }
            }
            RoomEvent::State { room_id, state, language } => ServerMessage::RoomState {
                room_id,
                state,
                language,
            },
            RoomEvent::Snapshot { room_id, content, language } => ServerMessage::RoomSnapshot {
                room_id,
                content,
                language,
            },
            RoomEvent::Update { room_id, update } => ServerMessage::SyncUpdate {
                room_id,
                update: update.to_vec(),
            },
            RoomEvent::Awareness { room_id, event } => match event {
                AwarenessEvent::Joined { connection_id } => {
                    ServerMessage::AwarenessJoined { room_id, connection_id }
                }
                AwarenessEvent::StateChanged { connection_id, state } => {
                    ServerMessage::AwarenessUpdate {
                        room_id,
                        connection_id,
                        update: state,
                    }
                }
                AwarenessEvent::Removed { connection_id } => {
                    ServerMessage::AwarenessRemoved { room_id, connection_id }
                }
            },
            RoomEvent::RemoteCursor {
                room_id,
                connection_id,
                position,
                participant,
            } => ServerMessage::RemoteCursor {
                room_id,
                connection_id,
                position,
                user: participant.info(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_format() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join-room",
            "roomId": "abc123",
            "user": {"name": "User42", "color": "hsl(10, 70%, 60%)"}
        }))
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: RoomId::new("abc123").unwrap(),
                user: ParticipantInfo {
                    name: "User42".into(),
                    color: "hsl(10, 70%, 60%)".into(),
                },
            }
        );
    }

    #[test]
    fn test_sync_update_is_byte_array() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "sync-update",
            "roomId": "abc123",
            "update": [1, 2]
        }))
        .unwrap();

        assert_eq!(msg.kind(), "sync-update");
        match msg {
            ClientMessage::SyncUpdate { update, .. } => assert_eq!(update, vec![0x01, 0x02]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cursor_position_camel_case() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "cursor-position",
            "roomId": "abc123",
            "position": {"lineNumber": 4, "column": 12},
            "user": {"name": "A", "color": "#fff"}
        }))
        .unwrap();

        match msg {
            ClientMessage::CursorPosition { position, .. } => {
                assert_eq!(position, CursorPosition::new(4, 12))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_room_event_maps_to_remote_cursor() {
        let participant = Participant::new(
            ConnectionId::new("ws:1"),
            ParticipantInfo {
                name: "A".into(),
                color: "#fff".into(),
            },
        );
        let msg = ServerMessage::from(RoomEvent::RemoteCursor {
            room_id: RoomId::new("abc123").unwrap(),
            connection_id: ConnectionId::new("ws:1"),
            position: CursorPosition::new(1, 2),
            participant,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "remote-cursor",
                "roomId": "abc123",
                "connectionId": "ws:1",
                "position": {"lineNumber": 1, "column": 2},
                "user": {"name": "A", "color": "#fff"}
            })
        );
    }

    #[test]
    fn test_room_event_maps_to_sync_update() {
        let msg = ServerMessage::from(RoomEvent::Update {
            room_id: RoomId::new("abc123").unwrap(),
            update: Bytes::from_static(&[3]),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "sync-update", "roomId": "abc123", "update": [3]})
        );
    }

    #[test]
    fn test_awareness_removed_wire_format() {
        let msg = ServerMessage::from(RoomEvent::Awareness {
            room_id: RoomId::new("abc123").unwrap(),
            event: AwarenessEvent::Removed {
                connection_id: ConnectionId::new("tcp:9"),
            },
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "awareness-removed", "roomId": "abc123", "connectionId": "tcp:9"})
        );
    }
}
