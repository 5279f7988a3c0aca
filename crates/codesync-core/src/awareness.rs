//! Ephemeral presence ("awareness") state and its relay
//!
//! Each connection owns one opaque JSON state bag per room. Updates replace
//! the bag wholesale and are forwarded to the other members only; the
//! sender never sees its own update echoed back.

use crate::event::{Outbound, RoomEvent};
use crate::room::{ConnectionId, Room, RoomId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Presence changes as seen by the other members of a room
#[derive(Debug, Clone, PartialEq)]
pub enum AwarenessEvent {
    /// A connection entered the room and may start publishing state
    Joined { connection_id: ConnectionId },

    /// A connection replaced its state
    StateChanged {
        connection_id: ConnectionId,
        state: Value,
    },

    /// A connection's state is gone (it left or disconnected)
    Removed { connection_id: ConnectionId },
}

/// Awareness states for every room, keyed by room then connection
#[derive(Debug, Default)]
pub struct AwarenessStore {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Value>>,
}

impl AwarenessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the state of `connection_id` and forward it to everyone else.
    /// Returns the number of connections it was queued for.
    ///
    /// Updates from connections that are not members of the room are
    /// dropped.
    pub fn set(
        &self,
        room: &Room,
        connection_id: &ConnectionId,
        state: Value,
        out: &dyn Outbound,
    ) -> usize {
        // Held across the insert so a concurrent leave prunes what we store
        let members = room.members();
        if !members.contains(connection_id) {
            debug!(room = %room.id(), client = %connection_id, "Ignoring awareness from non-member");
            return 0;
        }

        self.rooms
            .entry(room.id().clone())
            .or_default()
            .insert(connection_id.clone(), state.clone());

        let mut delivered = 0;
        for to in members.others(connection_id) {
            let event = RoomEvent::Awareness {
                room_id: room.id().clone(),
                event: AwarenessEvent::StateChanged {
                    connection_id: connection_id.clone(),
                    state: state.clone(),
                },
            };
            if out.deliver(to, event) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Bring a joiner up to date with existing presence and announce it to
    /// the other members.
    pub fn joined(&self, room: &Room, connection_id: &ConnectionId, out: &dyn Outbound) {
        let existing: Vec<(ConnectionId, Value)> = self
            .states(room.id())
            .into_iter()
            .filter(|(id, _)| id != connection_id)
            .collect();

        for (id, state) in existing {
            out.deliver(
                connection_id,
                RoomEvent::Awareness {
                    room_id: room.id().clone(),
                    event: AwarenessEvent::StateChanged {
                        connection_id: id,
                        state,
                    },
                },
            );
        }

        let members = room.members();
        for to in members.others(connection_id) {
            out.deliver(
                to,
                RoomEvent::Awareness {
                    room_id: room.id().clone(),
                    event: AwarenessEvent::Joined {
                        connection_id: connection_id.clone(),
                    },
                },
            );
        }
    }

    /// Drop the state of `connection_id` and tell the remaining members.
    /// Returns false if there was no state to remove.
    pub fn remove(&self, room: &Room, connection_id: &ConnectionId, out: &dyn Outbound) -> bool {
        let removed = self
            .rooms
            .get_mut(room.id())
            .and_then(|mut states| states.remove(connection_id))
            .is_some();

        if !removed {
            return false;
        }

        debug!(room = %room.id(), client = %connection_id, "Pruned awareness state");
        let members = room.members();
        for to in members.others(connection_id) {
            out.deliver(
                to,
                RoomEvent::Awareness {
                    room_id: room.id().clone(),
                    event: AwarenessEvent::Removed {
                        connection_id: connection_id.clone(),
                    },
                },
            );
        }
        true
    }

    /// Current states of a room, ordered by connection
    pub fn states(&self, room_id: &RoomId) -> Vec<(ConnectionId, Value)> {
        let mut states: Vec<_> = self
            .rooms
            .get(room_id)
            .map(|r| r.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn get(&self, room_id: &RoomId, connection_id: &ConnectionId) -> Option<Value> {
        self.rooms.get(room_id)?.get(connection_id).cloned()
    }

    /// Forget every state of a room
    pub fn clear_room(&self, room_id: &RoomId) {
        self.rooms.remove(room_id);
    }

    /// Total number of stored states
    pub fn len(&self) -> usize {
        self.rooms.iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentEngine, YrsEngine};
    use crate::event::testing::Recorder;
    use crate::room::{Participant, ParticipantInfo};
    use serde_json::json;

    fn room_with(ids: &[&str]) -> Room {
        let room = Room::new(RoomId::new("abc123").unwrap(), YrsEngine.create());
        for id in ids {
            room.members().insert(Participant::new(
                ConnectionId::new(*id),
                ParticipantInfo {
                    name: id.to_string(),
                    color: "#123456".into(),
                },
            ));
        }
        room
    }

    fn awareness_for(out: &Recorder, id: &str) -> Vec<AwarenessEvent> {
        out.to(id)
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::Awareness { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_set_never_echoes() {
        let room = room_with(&["a", "b"]);
        let store = AwarenessStore::new();
        let out = Recorder::default();

        let delivered = store.set(&room, &ConnectionId::new("a"), json!({"user": {"name": "A"}}), &out);

        assert_eq!(delivered, 1);
        assert!(awareness_for(&out, "a").is_empty());
        assert_eq!(
            awareness_for(&out, "b"),
            vec![AwarenessEvent::StateChanged {
                connection_id: ConnectionId::new("a"),
                state: json!({"user": {"name": "A"}}),
            }]
        );
    }

    #[test]
    fn test_set_replaces_whole_state() {
        let room = room_with(&["a"]);
        let store = AwarenessStore::new();
        let out = Recorder::default();
        let a = ConnectionId::new("a");

        store.set(&room, &a, json!({"user": "A", "cursor": 1}), &out);
        store.set(&room, &a, json!({"cursor": 2}), &out);

        assert_eq!(store.get(room.id(), &a), Some(json!({"cursor": 2})));
    }

    #[test]
    fn test_joiner_receives_existing_states() {
        let room = room_with(&["a", "b"]);
        let store = AwarenessStore::new();
        let out = Recorder::default();
        store.set(&room, &ConnectionId::new("a"), json!({"user": "A"}), &out);
        out.clear();

        room.members().insert(Participant::new(
            ConnectionId::new("c"),
            ParticipantInfo {
                name: "c".into(),
                color: "#000".into(),
            },
        ));
        store.joined(&room, &ConnectionId::new("c"), &out);

        assert_eq!(
            awareness_for(&out, "c"),
            vec![AwarenessEvent::StateChanged {
                connection_id: ConnectionId::new("a"),
                state: json!({"user": "A"}),
            }]
        );
        let joined = AwarenessEvent::Joined {
            connection_id: ConnectionId::new("c"),
        };
        assert_eq!(awareness_for(&out, "a"), vec![joined.clone()]);
        assert_eq!(awareness_for(&out, "b"), vec![joined]);
    }

    #[test]
    fn test_remove_broadcasts_once() {
        let room = room_with(&["a", "b"]);
        let store = AwarenessStore::new();
        let out = Recorder::default();
        let a = ConnectionId::new("a");
        store.set(&room, &a, json!({"user": "A"}), &out);
        out.clear();

        assert!(store.remove(&room, &a, &out));
        assert!(!store.remove(&room, &a, &out));

        assert_eq!(
            awareness_for(&out, "b"),
            vec![AwarenessEvent::Removed { connection_id: a }]
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_non_member_state_is_dropped() {
        let room = room_with(&["b"]);
        let store = AwarenessStore::new();
        let out = Recorder::default();

        let delivered = store.set(&room, &ConnectionId::new("a"), json!({"user": "A"}), &out);

        assert_eq!(delivered, 0);
        assert!(store.is_empty());
        assert!(awareness_for(&out, "b").is_empty());

        room.members().insert(Participant::new(
            ConnectionId::new("c"),
            ParticipantInfo {
                name: "c".into(),
                color: "#000".into(),
            },
        ));
        store.joined(&room, &ConnectionId::new("c"), &out);
        assert!(awareness_for(&out, "c").is_empty());
    }
}
