//! Rooms, participants and their identifiers

use crate::document::DocumentHandle;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Maximum room ID length in bytes
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Language tag used until a save or a persisted record says otherwise
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Room identifier - URL-safe, max 128 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidRoomId("Room ID cannot be empty".into()));
        }

        if id.len() > MAX_ROOM_ID_LEN {
            return Err(Error::InvalidRoomId(format!(
                "Room ID exceeds {} bytes",
                MAX_ROOM_ID_LEN
            )));
        }

        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::InvalidRoomId(
                "Room ID must match pattern [a-zA-Z0-9_-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned connection identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display identity a client announces when joining
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    pub color: String,
}

/// A connected member of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    pub color: String,
}

impl Participant {
    pub fn new(id: ConnectionId, info: ParticipantInfo) -> Self {
        Self {
            id,
            name: info.name,
            color: info.color,
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Participants of a room, in join order
#[derive(Debug, Default)]
pub struct Members {
    list: Vec<Participant>,
    emptied_at: Option<Instant>,
}

impl Members {
    /// Insert or replace a participant. Returns true if it was not present.
    pub fn insert(&mut self, participant: Participant) -> bool {
        self.emptied_at = None;
        match self.list.iter_mut().find(|p| p.id == participant.id) {
            Some(existing) => {
                *existing = participant;
                false
            }
            None => {
                self.list.push(participant);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Participant> {
        let pos = self.list.iter().position(|p| &p.id == id)?;
        let removed = self.list.remove(pos);
        if self.list.is_empty() {
            self.emptied_at = Some(Instant::now());
        }
        Some(removed)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.list.iter().any(|p| &p.id == id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.list.iter().find(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.list.iter()
    }

    /// Connection IDs of everyone except `exclude`
    pub fn others<'a>(&'a self, exclude: &'a ConnectionId) -> impl Iterator<Item = &'a ConnectionId> {
        self.list.iter().map(|p| &p.id).filter(move |id| *id != exclude)
    }

    pub fn to_vec(&self) -> Vec<Participant> {
        self.list.clone()
    }
}

/// A collaboration session scoped to one shared document
pub struct Room {
    id: RoomId,
    members: Mutex<Members>,
    document: Mutex<Box<dyn DocumentHandle>>,
    language: RwLock<String>,
    last_persisted: RwLock<Option<u64>>,
    created_at: Instant,
}

impl Room {
    pub fn new(id: RoomId, document: Box<dyn DocumentHandle>) -> Self {
        Self {
            id,
            members: Mutex::new(Members::default()),
            document: Mutex::new(document),
            language: RwLock::new(DEFAULT_LANGUAGE.to_string()),
            last_persisted: RwLock::new(None),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Lock the member list. Broadcasts that must observe a consistent
    /// membership are sent while this guard is held.
    pub fn members(&self) -> parking_lot::MutexGuard<'_, Members> {
        self.members.lock()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.members.lock().to_vec()
    }

    pub fn participant_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Lock the document handle
    pub fn document(&self) -> parking_lot::MutexGuard<'_, Box<dyn DocumentHandle>> {
        self.document.lock()
    }

    /// Replace the document with a fresh one, discarding all history
    pub fn reset_document(&self, document: Box<dyn DocumentHandle>) {
        *self.document.lock() = document;
    }

    /// Full current state of the document
    pub fn snapshot(&self) -> Vec<u8> {
        self.document.lock().encode_snapshot()
    }

    pub fn language(&self) -> String {
        self.language.read().clone()
    }

    pub fn set_language(&self, language: impl Into<String>) {
        *self.language.write() = language.into();
    }

    pub fn last_persisted(&self) -> Option<u64> {
        *self.last_persisted.read()
    }

    pub fn mark_persisted(&self, at: u64) {
        let mut last = self.last_persisted.write();
        if last.map_or(true, |prev| at >= prev) {
            *last = Some(at);
        }
    }

    /// How long the room has had no participants, if it is empty.
    /// A room that never had anyone counts from its creation.
    pub fn idle_for(&self) -> Option<std::time::Duration> {
        let members = self.members.lock();
        if !members.is_empty() {
            return None;
        }
        Some(members.emptied_at.unwrap_or(self.created_at).elapsed())
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("language", &self.language)
            .finish()
    }
}
