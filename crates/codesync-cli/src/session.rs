//! Client-side view of one room: local replica, peers, presence and cursors

use std::collections::BTreeMap;
use std::time::Instant;

use codesync_core::cursor::RemoteCursor;
use codesync_core::{
    ConnectionId, CursorPosition, CursorTracker, DocumentHandle, Participant, ParticipantInfo, RoomId,
    YrsDocument, DEFAULT_LANGUAGE,
};
use codesync_protocol::{ClientMessage, ServerMessage};
use serde_json::Value;
use tracing::{debug, warn};

/// What the client should do after receiving a message
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    /// Line to show the user
    pub notice: Option<String>,
    /// Messages to send back to the server
    pub outgoing: Vec<ClientMessage>,
}

impl Reaction {
    fn notice(text: impl Into<String>) -> Self {
        Self {
            notice: Some(text.into()),
            outgoing: Vec::new(),
        }
    }
}

pub struct Session {
    room_id: RoomId,
    me: ParticipantInfo,
    doc: YrsDocument,
    language: String,
    participants: Vec<Participant>,
    awareness: BTreeMap<ConnectionId, Value>,
    cursors: CursorTracker,
}

impl Session {
    pub fn new(room_id: RoomId, me: ParticipantInfo) -> Self {
        Self {
            room_id,
            me,
            doc: YrsDocument::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            participants: Vec::new(),
            awareness: BTreeMap::new(),
            cursors: CursorTracker::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: self.room_id.clone(),
            user: self.me.clone(),
        }
    }

    pub fn leave_message(&self) -> ClientMessage {
        ClientMessage::LeaveRoom {
            room_id: self.room_id.clone(),
        }
    }

    /// Append text to the local replica and produce the update to broadcast
    pub fn type_text(&mut self, text: &str) -> ClientMessage {
        let update = self.doc.append(text);
        ClientMessage::SyncUpdate {
            room_id: self.room_id.clone(),
            update,
        }
    }

    pub fn save_request(&self) -> ClientMessage {
        ClientMessage::SaveRequest {
            room_id: self.room_id.clone(),
            content: self.doc.text(),
            language: self.language.clone(),
        }
    }

    pub fn cursor(&self, line_number: u32, column: u32) -> ClientMessage {
        ClientMessage::CursorPosition {
            room_id: self.room_id.clone(),
            position: CursorPosition::new(line_number, column),
            user: self.me.clone(),
        }
    }

    pub fn status(&self, state: Value) -> ClientMessage {
        ClientMessage::AwarenessUpdate {
            room_id: self.room_id.clone(),
            update: state,
        }
    }

    pub fn text(&self) -> String {
        self.doc.text()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn awareness(&self) -> impl Iterator<Item = (&ConnectionId, &Value)> {
        self.awareness.iter()
    }

    pub fn visible_cursors(&mut self, now: Instant) -> Vec<(&ConnectionId, &RemoteCursor)> {
        self.cursors.expire(now);
        self.cursors.visible(now)
    }

    /// Fold a server message into the local view
    pub fn on_message(&mut self, message: ServerMessage, now: Instant) -> Reaction {
        match message {
            ServerMessage::ParticipantsChanged { room_id, participants } if room_id == self.room_id => {
                let names: Vec<_> = participants.iter().map(|p| p.name.as_str()).collect();
                let notice = format!("participants: {}", names.join(", "));
                let present: Vec<&ConnectionId> = participants.iter().map(|p| &p.id).collect();
                self.awareness.retain(|id, _| present.contains(&id));
                self.participants = participants;
                Reaction::notice(notice)
            }
            ServerMessage::RoomState { room_id, state, language } if room_id == self.room_id => {
                self.language = language;
                match self.doc.apply_update(&state) {
                    Ok(()) => Reaction::notice(format!("synced live state ({} bytes)", state.len())),
                    Err(e) => {
                        warn!(error = %e, "Failed to apply room state");
                        Reaction::notice("could not apply room state")
                    }
                }
            }
            ServerMessage::RoomSnapshot { room_id, content, language } if room_id == self.room_id => {
                self.language = language;
                let mut reaction = Reaction::notice(format!(
                    "loaded snapshot ({} chars, {})",
                    content.chars().count(),
                    self.language
                ));
                // Only the first one in gets a snapshot, and the server has
                // started the room over: rebuild the shared text from it.
                self.doc = YrsDocument::new();
                if !content.is_empty() {
                    reaction.outgoing.push(self.type_text(&content));
                }
                reaction
            }
            ServerMessage::SyncUpdate { room_id, update } if room_id == self.room_id => {
                if let Err(e) = self.doc.apply_update(&update) {
                    debug!(error = %e, "Ignoring update the local replica rejected");
                }
                Reaction::default()
            }
            ServerMessage::AwarenessUpdate {
                room_id,
                connection_id,
                update,
            } if room_id == self.room_id => {
                let notice = format!("{} status: {}", self.name_of(&connection_id), update);
                self.awareness.insert(connection_id, update);
                Reaction::notice(notice)
            }
            ServerMessage::AwarenessJoined { room_id, connection_id } if room_id == self.room_id => {
                Reaction::notice(format!("{} is here", self.name_of(&connection_id)))
            }
            ServerMessage::AwarenessRemoved { room_id, connection_id } if room_id == self.room_id => {
                self.awareness.remove(&connection_id);
                self.cursors.forget(&connection_id);
                Reaction::default()
            }
            ServerMessage::RemoteCursor {
                room_id,
                connection_id,
                position,
                user,
            } if room_id == self.room_id => {
                let participant = Participant::new(connection_id.clone(), user);
                self.cursors.record(connection_id, position, participant, now);
                Reaction::default()
            }
            ServerMessage::Pong => Reaction::notice("pong"),
            ServerMessage::Error { code, message } => Reaction::notice(format!("server error {}: {}", code, message)),
            other => {
                debug!(message = ?other, "Ignoring message for another room");
                Reaction::default()
            }
        }
    }

    fn name_of(&self, connection_id: &ConnectionId) -> String {
        self.participants
            .iter()
            .find(|p| &p.id == connection_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| connection_id.to_string())
    }
}
