//! Events fanned out to room members

use crate::awareness::AwarenessEvent;
use crate::cursor::CursorPosition;
use crate::room::{ConnectionId, Participant, RoomId};
use bytes::Bytes;

/// Something a single connection should be told about a room
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The full participant list after a join or leave
    ParticipantsChanged {
        room_id: RoomId,
        participants: Vec<Participant>,
    },

    /// Live document state, sent once to a joiner when peers are present
    State {
        room_id: RoomId,
        state: Vec<u8>,
        language: String,
    },

    /// Persisted (or default) content, sent once to a joiner of an empty room
    Snapshot {
        room_id: RoomId,
        content: String,
        language: String,
    },

    /// A document delta from another participant, verbatim
    Update { room_id: RoomId, update: Bytes },

    Awareness {
        room_id: RoomId,
        event: AwarenessEvent,
    },

    RemoteCursor {
        room_id: RoomId,
        connection_id: ConnectionId,
        position: CursorPosition,
        participant: Participant,
    },
}

impl RoomEvent {
    pub fn room_id(&self) -> &RoomId {
        match self {
            RoomEvent::ParticipantsChanged { room_id, .. }
            | RoomEvent::State { room_id, .. }
            | RoomEvent::Snapshot { room_id, .. }
            | RoomEvent::Update { room_id, .. }
            | RoomEvent::Awareness { room_id, .. }
            | RoomEvent::RemoteCursor { room_id, .. } => room_id,
        }
    }
}

/// Delivery of room events to individual connections.
///
/// Implementations must preserve per-connection order and must not block.
pub trait Outbound: Send + Sync {
    /// Queue `event` for `to`. Returns false if the connection is gone.
    fn deliver(&self, to: &ConnectionId, event: RoomEvent) -> bool;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every delivery in order
    #[derive(Default)]
    pub struct Recorder {
        pub sent: Mutex<Vec<(ConnectionId, RoomEvent)>>,
    }

    impl Recorder {
        pub fn to(&self, id: &str) -> Vec<RoomEvent> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| to.as_str() == id)
                .map(|(_, e)| e.clone())
                .collect()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl Outbound for Recorder {
        fn deliver(&self, to: &ConnectionId, event: RoomEvent) -> bool {
            self.sent.lock().push((to.clone(), event));
            true
        }
    }
}
