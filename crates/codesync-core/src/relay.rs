//! Update relay - applies document deltas and rebroadcasts them

use crate::event::{Outbound, RoomEvent};
use crate::room::{ConnectionId, Room};
use bytes::Bytes;
use tracing::{debug, warn};

/// Result of relaying one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Whether the server-side replica accepted the bytes
    pub applied: bool,
    /// Number of connections the bytes were queued for
    pub delivered: usize,
}

/// Apply `update` to the room's document and forward it verbatim to every
/// other member.
///
/// A failed apply is logged and otherwise ignored: peers apply the same bytes
/// independently, so the broadcast still goes out. The document is updated
/// before the member list is read, so a member added concurrently either
/// received a snapshot containing the update or receives the update itself.
pub fn relay_update(
    room: &Room,
    sender: &ConnectionId,
    update: Bytes,
    out: &dyn Outbound,
) -> RelayOutcome {
    let applied = match room.document().apply_update(&update) {
        Ok(()) => true,
        Err(e) => {
            warn!(room = %room.id(), client = %sender, error = %e, "Failed to apply update");
            false
        }
    };

    let members = room.members();
    let mut delivered = 0;
    for to in members.others(sender) {
        let event = RoomEvent::Update {
            room_id: room.id().clone(),
            update: update.clone(),
        };
        if out.deliver(to, event) {
            delivered += 1;
        }
    }

    debug!(room = %room.id(), client = %sender, bytes = update.len(), delivered, "Relayed update");
    RelayOutcome { applied, delivered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentEngine, DocumentHandle, YrsDocument, YrsEngine};
    use crate::event::testing::Recorder;
    use crate::room::{Participant, ParticipantInfo, RoomId};

    fn join(room: &Room, id: &str) {
        room.members().insert(Participant::new(
            ConnectionId::new(id),
            ParticipantInfo {
                name: id.into(),
                color: "#00ff00".into(),
            },
        ));
    }

    fn updates_for(out: &Recorder, id: &str) -> Vec<Bytes> {
        out.to(id)
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::Update { update, .. } => Some(update),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_relay_excludes_sender() {
        let room = Room::new(RoomId::new("abc123").unwrap(), YrsEngine.create());
        join(&room, "a");
        join(&room, "b");
        join(&room, "c");

        let mut local = YrsDocument::new();
        let update = Bytes::from(local.append("x"));
        let out = Recorder::default();
        let outcome = relay_update(&room, &ConnectionId::new("a"), update.clone(), &out);

        assert_eq!(outcome, RelayOutcome { applied: true, delivered: 2 });
        assert!(updates_for(&out, "a").is_empty());
        assert_eq!(updates_for(&out, "b"), vec![update.clone()]);
        assert_eq!(updates_for(&out, "c"), vec![update]);
    }

    #[test]
    fn test_malformed_update_still_broadcast() {
        let room = Room::new(RoomId::new("abc123").unwrap(), YrsEngine.create());
        join(&room, "a");
        join(&room, "b");

        let garbage = Bytes::from_static(&[0xff, 0xff, 0xff]);
        let out = Recorder::default();
        let outcome = relay_update(&room, &ConnectionId::new("a"), garbage.clone(), &out);

        assert!(!outcome.applied);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(updates_for(&out, "b"), vec![garbage]);
    }

    #[test]
    fn test_server_replica_tracks_relayed_updates() {
        let room = Room::new(RoomId::new("abc123").unwrap(), YrsEngine.create());
        join(&room, "a");

        let mut local = YrsDocument::new();
        let out = Recorder::default();
        relay_update(&room, &ConnectionId::new("a"), Bytes::from(local.append("let x")), &out);
        relay_update(&room, &ConnectionId::new("a"), Bytes::from(local.append(" = 1;")), &out);

        let mut fresh = YrsDocument::new();
        fresh.apply_update(&room.snapshot()).unwrap();
        assert_eq!(fresh.text(), "let x = 1;");
    }

    /// Peers edit concurrently, and each peer receives the others' updates in
    /// a different order (some twice). Every replica ends up identical.
    #[test]
    fn test_peers_converge_under_interleaving() {
        let room = Room::new(RoomId::new("converge").unwrap(), YrsEngine.create());
        let ids = ["p0", "p1", "p2", "p3"];
        for id in ids {
            join(&room, id);
        }
        let mut peers: Vec<YrsDocument> = ids.iter().map(|_| YrsDocument::new()).collect();
        let out = Recorder::default();

        for round in 0..5 {
            for (i, id) in ids.iter().enumerate() {
                let chunk = format!("{}{}", id, round);
                let index = (round as u32 * 3 + i as u32) % (peers[i].text().len() as u32 + 1);
                let update = peers[i].insert(index, &chunk);
                relay_update(&room, &ConnectionId::new(*id), Bytes::from(update), &out);
            }
        }

        for (i, id) in ids.iter().enumerate() {
            let mut inbound = updates_for(&out, id);
            // Vary delivery order per peer and replay a few updates
            if i % 2 == 1 {
                inbound.reverse();
            }
            let replay: Vec<Bytes> = inbound.iter().step_by(3).cloned().collect();
            inbound.extend(replay);
            for update in inbound {
                peers[i].apply_update(&update).unwrap();
            }
        }

        let mut server = YrsDocument::new();
        server.apply_update(&room.snapshot()).unwrap();
        let expected = server.text();
        assert!(!expected.is_empty());
        for peer in &peers {
            assert_eq!(peer.text(), expected);
        }
    }
}
