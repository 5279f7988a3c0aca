//! Cursor fan-out and client-side expiry

use crate::event::{Outbound, RoomEvent};
use crate::room::{ConnectionId, Participant, Room};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a remote cursor decoration stays visible
pub const CURSOR_TTL: Duration = Duration::from_secs(3);

/// Editor position, 1-based like the editing surface reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line_number: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line_number: u32, column: u32) -> Self {
        Self { line_number, column }
    }
}

/// Send a cursor position to every other member of the room.
/// Returns the number of connections it was queued for.
pub fn publish_cursor(
    room: &Room,
    sender: &ConnectionId,
    position: CursorPosition,
    participant: Participant,
    out: &dyn Outbound,
) -> usize {
    let members = room.members();
    let mut delivered = 0;
    for to in members.others(sender) {
        let event = RoomEvent::RemoteCursor {
            room_id: room.id().clone(),
            connection_id: sender.clone(),
            position,
            participant: participant.clone(),
        };
        if out.deliver(to, event) {
            delivered += 1;
        }
    }
    delivered
}

/// A remote cursor as last seen by a client
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub position: CursorPosition,
    pub participant: Participant,
    pub seen_at: Instant,
}

/// Client-side view of remote cursors.
///
/// Only the latest position per peer is kept, and it stops being visible
/// `CURSOR_TTL` after it arrived even if the peer is still connected.
#[derive(Debug, Default)]
pub struct CursorTracker {
    cursors: HashMap<ConnectionId, RemoteCursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        connection_id: ConnectionId,
        position: CursorPosition,
        participant: Participant,
        now: Instant,
    ) {
        self.cursors.insert(
            connection_id,
            RemoteCursor {
                position,
                participant,
                seen_at: now,
            },
        );
    }

    /// Cursors drawn less than `CURSOR_TTL` before `now`
    pub fn visible(&self, now: Instant) -> Vec<(&ConnectionId, &RemoteCursor)> {
        let mut visible: Vec<_> = self
            .cursors
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.seen_at) < CURSOR_TTL)
            .collect();
        visible.sort_by(|a, b| a.0.cmp(b.0));
        visible
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.cursors.len();
        self.cursors
            .retain(|_, c| now.saturating_duration_since(c.seen_at) < CURSOR_TTL);
        before - self.cursors.len()
    }

    pub fn forget(&mut self, connection_id: &ConnectionId) {
        self.cursors.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentEngine, YrsEngine};
    use crate::event::testing::Recorder;
    use crate::room::{ParticipantInfo, RoomId};

    fn participant(id: &str) -> Participant {
        Participant::new(
            ConnectionId::new(id),
            ParticipantInfo {
                name: id.to_uppercase(),
                color: "#ff6464".into(),
            },
        )
    }

    #[test]
    fn test_publish_cursor_skips_sender() {
        let room = Room::new(RoomId::new("abc123").unwrap(), YrsEngine.create());
        room.members().insert(participant("a"));
        room.members().insert(participant("b"));
        room.members().insert(participant("c"));

        let out = Recorder::default();
        let sender = ConnectionId::new("a");
        let delivered = publish_cursor(&room, &sender, CursorPosition::new(3, 7), participant("a"), &out);

        assert_eq!(delivered, 2);
        assert!(out.to("a").is_empty());
        match &out.to("b")[0] {
            RoomEvent::RemoteCursor { connection_id, position, .. } => {
                assert_eq!(connection_id, &sender);
                assert_eq!(*position, CursorPosition::new(3, 7));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_cursor_expires_after_ttl() {
        let mut tracker = CursorTracker::new();
        let t0 = Instant::now();
        tracker.record(ConnectionId::new("b"), CursorPosition::new(1, 1), participant("b"), t0);

        assert_eq!(tracker.visible(t0 + Duration::from_millis(2999)).len(), 1);
        assert!(tracker.visible(t0 + CURSOR_TTL).is_empty());
        assert_eq!(tracker.expire(t0 + CURSOR_TTL), 1);
    }

    #[test]
    fn test_newer_position_refreshes_cursor() {
        let mut tracker = CursorTracker::new();
        let t0 = Instant::now();
        let b = ConnectionId::new("b");
        tracker.record(b.clone(), CursorPosition::new(1, 1), participant("b"), t0);
        tracker.record(b.clone(), CursorPosition::new(2, 5), participant("b"), t0 + Duration::from_secs(2));

        let visible = tracker.visible(t0 + Duration::from_secs(4));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].1.position, CursorPosition::new(2, 5));
    }
}
