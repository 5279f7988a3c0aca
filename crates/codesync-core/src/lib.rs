//! CodeSync Core - rooms, relays and presence
//!
//! This crate provides the in-memory half of the collaboration server:
//! - Room registry with idempotent room creation
//! - Update relay over an opaque replicated-document capability
//! - Awareness and cursor fan-out that never echoes to the sender
//! - Debounced triggers for saving room content

pub mod awareness;
pub mod cursor;
pub mod debounce;
pub mod document;
pub mod error;
pub mod event;
pub mod registry;
pub mod relay;
pub mod room;

pub use awareness::{AwarenessEvent, AwarenessStore};
pub use cursor::{publish_cursor, CursorPosition, CursorTracker, CURSOR_TTL};
pub use debounce::{Debouncer, SAVE_DEBOUNCE};
pub use document::{DocumentEngine, DocumentHandle, YrsDocument, YrsEngine};
pub use error::{Error, Result};
pub use event::{Outbound, RoomEvent};
pub use registry::{Admission, RegistryStats, RoomRegistry};
pub use relay::{relay_update, RelayOutcome};
pub use room::{
    now_millis, ConnectionId, Participant, ParticipantInfo, Room, RoomId, DEFAULT_LANGUAGE,
};
