//! Room registry - owns every room and tracks which rooms each connection is in

use crate::document::DocumentEngine;
use crate::event::{Outbound, RoomEvent};
use crate::room::{ConnectionId, Participant, Room, RoomId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of adding a participant to a room
#[derive(Debug, Clone)]
pub struct Admission {
    pub room: Arc<Room>,
    /// Whether anyone else was in the room before this join
    pub had_peers: bool,
}

/// All rooms of the process, keyed by room ID
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    /// connection -> rooms it currently belongs to
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
    engine: Arc<dyn DocumentEngine>,
}

impl RoomRegistry {
    /// Create a registry whose rooms get documents from `engine`
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            engine,
        }
    }

    /// Get a room, creating it (with an empty document) on first use
    pub fn get_or_create(&self, id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.get(id) {
            return room.value().clone();
        }

        self.rooms
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(room = %id, "Creating room");
                Arc::new(Room::new(id.clone(), self.engine.create()))
            })
            .value()
            .clone()
    }

    /// Get an existing room
    pub fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Add (or re-add) a participant and broadcast the new list to the whole
    /// room, joiner included.
    ///
    /// A room nobody is in restarts on an empty document: whoever enters it
    /// is seeded from the persisted record, not from leftover history.
    pub fn add_participant(
        &self,
        room_id: &RoomId,
        participant: Participant,
        out: &dyn Outbound,
    ) -> Admission {
        let connection_id = participant.id.clone();

        self.memberships
            .entry(connection_id.clone())
            .or_default()
            .insert(room_id.clone());

        let room: Arc<Room>;
        let mut members;
        {
            // Lock the members while the map entry is held so eviction, which
            // checks emptiness under the same entry, cannot drop the room
            // before the joiner is in it.
            let entry = self.rooms.entry(room_id.clone()).or_insert_with(|| {
                debug!(room = %room_id, "Creating room");
                Arc::new(Room::new(room_id.clone(), self.engine.create()))
            });
            room = entry.value().clone();
            members = room.members();
        }

        let had_peers = members.others(&connection_id).next().is_some();
        if members.is_empty() {
            room.reset_document(self.engine.create());
        }
        members.insert(participant);
        broadcast_participants(&room, &members.to_vec(), members.iter().map(|p| &p.id), out);
        drop(members);

        info!(room = %room_id, client = %connection_id, had_peers, "Participant joined");
        Admission { room, had_peers }
    }

    /// Remove a participant from one room. Returns false if it was not there.
    pub fn leave(&self, room_id: &RoomId, connection_id: &ConnectionId, out: &dyn Outbound) -> bool {
        if let Some(mut rooms) = self.memberships.get_mut(connection_id) {
            rooms.remove(room_id);
        }
        self.memberships.remove_if(connection_id, |_, rooms| rooms.is_empty());

        match self.get(room_id) {
            Some(room) => self.remove_from(&room, connection_id, out),
            None => false,
        }
    }

    /// Remove a participant from every room it belongs to, broadcasting the
    /// new list in each. Returns the affected rooms.
    pub fn remove_participant(&self, connection_id: &ConnectionId, out: &dyn Outbound) -> Vec<RoomId> {
        let room_ids = self
            .memberships
            .remove(connection_id)
            .map(|(_, rooms)| rooms)
            .unwrap_or_default();

        let mut affected: Vec<RoomId> = room_ids
            .into_iter()
            .filter(|id| {
                self.get(id)
                    .map(|room| self.remove_from(&room, connection_id, out))
                    .unwrap_or(false)
            })
            .collect();
        affected.sort();
        affected
    }

    fn remove_from(&self, room: &Room, connection_id: &ConnectionId, out: &dyn Outbound) -> bool {
        let mut members = room.members();
        if members.remove(connection_id).is_none() {
            return false;
        }
        broadcast_participants(room, &members.to_vec(), members.iter().map(|p| &p.id), out);
        info!(room = %room.id(), client = %connection_id, remaining = members.len(), "Participant left");
        true
    }

    /// Rooms a connection currently belongs to
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let mut rooms: Vec<_> = self
            .memberships
            .get(connection_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Remove rooms that have had no participants for at least `grace`.
    /// Returns the removed room IDs.
    pub fn evict_idle(&self, grace: Duration) -> Vec<RoomId> {
        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().idle_for().is_some_and(|idle| idle >= grace))
            .map(|entry| entry.key().clone())
            .collect();

        idle.into_iter()
            .filter(|id| {
                // Someone may have joined since the scan
                self.rooms
                    .remove_if(id, |_, room| room.idle_for().is_some_and(|idle| idle >= grace))
                    .is_some()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<_> = self.rooms.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            participant_count: self.rooms.iter().map(|r| r.value().participant_count()).sum(),
            connection_count: self.memberships.len(),
        }
    }
}

fn broadcast_participants<'a>(
    room: &Room,
    participants: &[Participant],
    recipients: impl Iterator<Item = &'a ConnectionId>,
    out: &dyn Outbound,
) {
    for to in recipients {
        out.deliver(
            to,
            RoomEvent::ParticipantsChanged {
                room_id: room.id().clone(),
                participants: participants.to_vec(),
            },
        );
    }
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub room_count: usize,
    pub participant_count: usize,
    pub connection_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentHandle, YrsDocument, YrsEngine};
    use crate::event::testing::Recorder;
    use crate::room::ParticipantInfo;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(YrsEngine))
    }

    fn participant(id: &str) -> Participant {
        Participant::new(
            ConnectionId::new(id),
            ParticipantInfo {
                name: format!("User{}", id),
                color: "hsl(200, 70%, 60%)".into(),
            },
        )
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn last_list(out: &Recorder, to: &str) -> Vec<String> {
        out.to(to)
            .into_iter()
            .rev()
            .find_map(|e| match e {
                RoomEvent::ParticipantsChanged { participants, .. } => {
                    Some(participants.into_iter().map(|p| p.id.as_str().to_string()).collect())
                }
                _ => None,
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let a = registry.get_or_create(&room("abc123"));
        let b = registry.get_or_create(&room("abc123"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_join_broadcasts_to_everyone_including_joiner() {
        let registry = registry();
        let out = Recorder::default();

        let first = registry.add_participant(&room("abc123"), participant("a"), &out);
        let second = registry.add_participant(&room("abc123"), participant("b"), &out);

        assert!(!first.had_peers);
        assert!(second.had_peers);
        assert_eq!(last_list(&out, "a"), vec!["a", "b"]);
        assert_eq!(last_list(&out, "b"), vec!["a", "b"]);
    }

    #[test]
    fn test_rejoin_does_not_duplicate() {
        let registry = registry();
        let out = Recorder::default();

        registry.add_participant(&room("abc123"), participant("a"), &out);
        let again = registry.add_participant(&room("abc123"), participant("a"), &out);

        assert!(!again.had_peers);
        assert_eq!(last_list(&out, "a"), vec!["a"]);
    }

    #[test]
    fn test_disconnect_removes_from_every_room() {
        let registry = registry();
        let out = Recorder::default();

        registry.add_participant(&room("r1"), participant("a"), &out);
        registry.add_participant(&room("r1"), participant("b"), &out);
        registry.add_participant(&room("r2"), participant("a"), &out);
        registry.add_participant(&room("r2"), participant("c"), &out);
        out.clear();

        let affected = registry.remove_participant(&ConnectionId::new("a"), &out);

        assert_eq!(affected, vec![room("r1"), room("r2")]);
        assert_eq!(last_list(&out, "b"), vec!["b"]);
        assert_eq!(last_list(&out, "c"), vec!["c"]);
        assert!(out.to("a").is_empty());
        assert!(registry.rooms_of(&ConnectionId::new("a")).is_empty());
    }

    #[test]
    fn test_disconnect_keeps_empty_room() {
        let registry = registry();
        let out = Recorder::default();

        registry.add_participant(&room("abc123"), participant("a"), &out);
        registry.remove_participant(&ConnectionId::new("a"), &out);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&room("abc123")).unwrap().participant_count(), 0);
    }

    #[test]
    fn test_leave_single_room() {
        let registry = registry();
        let out = Recorder::default();

        registry.add_participant(&room("r1"), participant("a"), &out);
        registry.add_participant(&room("r2"), participant("a"), &out);

        assert!(registry.leave(&room("r1"), &ConnectionId::new("a"), &out));
        assert!(!registry.leave(&room("r1"), &ConnectionId::new("a"), &out));
        assert_eq!(registry.rooms_of(&ConnectionId::new("a")), vec![room("r2")]);
    }

    #[test]
    fn test_list_matches_connection_set_after_churn() {
        let registry = registry();
        let out = Recorder::default();
        let r = room("churn");

        for id in ["a", "b", "c", "d"] {
            registry.add_participant(&r, participant(id), &out);
        }
        registry.remove_participant(&ConnectionId::new("b"), &out);
        registry.add_participant(&r, participant("e"), &out);
        registry.add_participant(&r, participant("c"), &out);
        registry.leave(&r, &ConnectionId::new("d"), &out);

        let expected = vec!["a", "c", "e"];
        for id in &expected {
            assert_eq!(&last_list(&out, id), &expected);
        }
        let stats = registry.stats();
        assert_eq!(stats.participant_count, 3);
        assert_eq!(stats.connection_count, 3);
    }

    #[test]
    fn test_evict_idle_only_removes_empty_rooms() {
        let registry = registry();
        let out = Recorder::default();

        registry.add_participant(&room("busy"), participant("a"), &out);
        registry.add_participant(&room("idle"), participant("b"), &out);
        registry.remove_participant(&ConnectionId::new("b"), &out);

        assert!(registry.evict_idle(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.evict_idle(Duration::ZERO), vec![room("idle")]);
        assert_eq!(registry.room_ids(), vec![room("busy")]);
    }

    fn text_of(room: &Room) -> String {
        let mut replica = YrsDocument::new();
        replica.apply_update(&room.snapshot()).unwrap();
        replica.text()
    }

    #[test]
    fn test_emptied_room_restarts_on_fresh_document() {
        let registry = registry();
        let out = Recorder::default();
        let mut editor = YrsDocument::new();

        let first = registry.add_participant(&room("abc123"), participant("a"), &out);
        first.room.document().apply_update(&editor.append("hello")).unwrap();

        // Still occupied: a second joiner keeps the live history
        registry.add_participant(&room("abc123"), participant("b"), &out);
        assert_eq!(text_of(&first.room), "hello");

        registry.remove_participant(&ConnectionId::new("a"), &out);
        registry.remove_participant(&ConnectionId::new("b"), &out);

        let next = registry.add_participant(&room("abc123"), participant("c"), &out);
        assert!(Arc::ptr_eq(&first.room, &next.room));
        assert_eq!(text_of(&next.room), "");
    }

    #[test]
    fn test_rejoin_by_sole_member_keeps_document() {
        let registry = registry();
        let out = Recorder::default();
        let mut editor = YrsDocument::new();

        let first = registry.add_participant(&room("abc123"), participant("a"), &out);
        first.room.document().apply_update(&editor.append("draft")).unwrap();
        registry.add_participant(&room("abc123"), participant("a"), &out);

        assert_eq!(text_of(&first.room), "draft");
    }

    #[test]
    fn test_joined_room_is_never_evicted() {
        let registry = registry();
        let out = Recorder::default();
        let r = room("contended");

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2_000 {
                    registry.evict_idle(Duration::ZERO);
                }
            });

            for _ in 0..2_000 {
                let admission = registry.add_participant(&r, participant("a"), &out);
                let held = registry.get(&r).expect("occupied room was evicted");
                assert!(Arc::ptr_eq(&held, &admission.room));
                registry.remove_participant(&ConnectionId::new("a"), &out);
            }
        });
    }
}
