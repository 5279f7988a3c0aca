//! Connection lifecycle - joins, leaves, disconnects and room seeding
//!
//! The coordinator ties the room registry, the awareness store and the
//! durable store together, and owns one outbound queue per connection.
//! Every room event passes through [`Outbound::deliver`], which converts it
//! to a wire message and pushes it onto the recipient's queue.

use bytes::Bytes;
use codesync_core::{
    AwarenessStore, ConnectionId, CursorPosition, DocumentEngine, Outbound, Participant, ParticipantInfo,
    RelayOutcome, RoomEvent, RoomId, RoomRegistry, YrsEngine, DEFAULT_LANGUAGE,
};
use codesync_protocol::ServerMessage;
use codesync_storage::{MemoryStore, PersistedRoom, RoomStore, StoreError};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Receiving end of a connection's outbound queue
pub type Outbox = mpsc::UnboundedReceiver<ServerMessage>;

/// Behavior switches for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Remove a connection's awareness state, and tell its peers, when it
    /// disconnects or leaves a room
    pub prune_awareness_on_disconnect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prune_awareness_on_disconnect: true,
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub rooms: usize,
    pub participants: usize,
    pub connections: usize,
    pub awareness_states: usize,
}

/// Things worth counting, independent of whether metrics are compiled in
#[derive(Debug, Clone, Copy)]
pub(crate) enum Observed {
    Connected(&'static str),
    Disconnected(&'static str),
    Relayed { applied: bool },
    Awareness,
    Cursor,
    Saved,
    SaveFailed,
    ProtocolError(&'static str),
}

pub struct Coordinator {
    registry: Arc<RoomRegistry>,
    awareness: AwarenessStore,
    store: Arc<dyn RoomStore>,
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
    config: CoordinatorConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl Coordinator {
    pub fn new(registry: Arc<RoomRegistry>, store: Arc<dyn RoomStore>) -> Self {
        Self {
            registry,
            awareness: AwarenessStore::new(),
            store,
            outboxes: DashMap::new(),
            config: CoordinatorConfig::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Yrs documents and a volatile in-memory store
    pub fn in_memory() -> Self {
        let engine: Arc<dyn DocumentEngine> = Arc::new(YrsEngine);
        Self::new(
            Arc::new(RoomRegistry::new(engine)),
            Arc::new(MemoryStore::new()),
        )
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Register a connection and hand back its outbound queue
    pub fn connect(&self, connection_id: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.outboxes.insert(connection_id.clone(), tx).is_some() {
            warn!(client = %connection_id, "Connection ID reused, replacing outbox");
        }
        self.observe(Observed::Connected(transport_of(&connection_id)));
        rx
    }

    /// Queue a message for one connection
    pub fn send(&self, to: &ConnectionId, message: ServerMessage) -> bool {
        match self.outboxes.get(to) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Reply to a malformed frame
    pub fn reject(&self, to: &ConnectionId, code: &'static str, message: impl Into<String>) {
        self.observe(Observed::ProtocolError(code));
        self.send(to, ServerMessage::error(code, message));
    }

    /// Add a connection to a room and seed it with the room's content.
    ///
    /// With peers present the joiner gets the live document state. Otherwise
    /// it gets the persisted record, or an empty default when there is none.
    pub async fn join(&self, connection_id: &ConnectionId, room_id: &RoomId, info: ParticipantInfo) {
        let participant = Participant::new(connection_id.clone(), info);
        let admission = self.registry.add_participant(room_id, participant, self);
        let room = admission.room;

        self.awareness.joined(&room, connection_id, self);

        if admission.had_peers {
            {
                // Under the member lock so no relayed update can be queued
                // ahead of the state it builds on.
                let _members = room.members();
                let event = RoomEvent::State {
                    room_id: room_id.clone(),
                    state: room.snapshot(),
                    language: room.language(),
                };
                self.deliver(connection_id, event);
            }
            self.refresh_gauges();
            return;
        }

        let (content, language) = match self.store.load(room_id).await {
            Ok(Some(record)) => {
                debug!(room = %room_id, bytes = record.content.len(), "Seeding from persisted snapshot");
                room.set_language(record.language.clone());
                (record.content, record.language)
            }
            Ok(None) => (String::new(), DEFAULT_LANGUAGE.to_string()),
            Err(e) => {
                warn!(room = %room_id, client = %connection_id, error = %e, "Failed to load room, skipping seed");
                self.refresh_gauges();
                return;
            }
        };

        self.deliver(
            connection_id,
            RoomEvent::Snapshot {
                room_id: room_id.clone(),
                content,
                language,
            },
        );
        self.refresh_gauges();
    }

    /// Take a connection out of one room
    pub fn leave(&self, connection_id: &ConnectionId, room_id: &RoomId) -> bool {
        let left = self.registry.leave(room_id, connection_id, self);
        if left && self.config.prune_awareness_on_disconnect {
            if let Some(room) = self.registry.get(room_id) {
                self.awareness.remove(&room, connection_id, self);
            }
        }
        self.refresh_gauges();
        left
    }

    /// Apply an update to the room's document and forward it to the other
    /// members. Rooms are created on demand.
    pub fn relay_update(&self, connection_id: &ConnectionId, room_id: &RoomId, update: Bytes) -> RelayOutcome {
        let room = self.registry.get_or_create(room_id);
        let outcome = codesync_core::relay_update(&room, connection_id, update, self);
        self.observe(Observed::Relayed {
            applied: outcome.applied,
        });
        outcome
    }

    /// Replace a connection's presence state and forward it
    pub fn set_awareness(&self, connection_id: &ConnectionId, room_id: &RoomId, state: Value) -> usize {
        let room = self.registry.get_or_create(room_id);
        self.observe(Observed::Awareness);
        self.awareness.set(&room, connection_id, state, self)
    }

    pub fn publish_cursor(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        position: CursorPosition,
        info: ParticipantInfo,
    ) -> usize {
        let room = self.registry.get_or_create(room_id);
        self.observe(Observed::Cursor);
        let participant = Participant::new(connection_id.clone(), info);
        codesync_core::publish_cursor(&room, connection_id, position, participant, self)
    }

    /// Persist the full content of a room.
    ///
    /// Failures are logged here; callers only need the result for tests.
    pub async fn save(&self, room_id: &RoomId, content: &str, language: &str) -> Result<PersistedRoom, StoreError> {
        match self.store.save(room_id, content, language).await {
            Ok(record) => {
                if let Some(room) = self.registry.get(room_id) {
                    room.set_language(language);
                    room.mark_persisted(record.last_updated);
                }
                self.observe(Observed::Saved);
                debug!(room = %room_id, bytes = content.len(), "Room saved");
                Ok(record)
            }
            Err(e) => {
                self.observe(Observed::SaveFailed);
                warn!(room = %room_id, error = %e, transient = e.is_transient(), "Failed to save room");
                Err(e)
            }
        }
    }

    /// Remove a connection from every room and drop its outbox.
    /// Returns the rooms it was in.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let rooms = self.registry.remove_participant(connection_id, self);

        if self.config.prune_awareness_on_disconnect {
            for room_id in &rooms {
                if let Some(room) = self.registry.get(room_id) {
                    self.awareness.remove(&room, connection_id, self);
                }
            }
        }

        if self.outboxes.remove(connection_id).is_some() {
            self.observe(Observed::Disconnected(transport_of(connection_id)));
        }
        self.refresh_gauges();

        info!(client = %connection_id, rooms = rooms.len(), "Connection closed");
        rooms
    }

    /// Drop rooms that have been empty for at least `grace`
    pub fn evict_idle(&self, grace: Duration) -> Vec<RoomId> {
        let evicted = self.registry.evict_idle(grace);
        for room_id in &evicted {
            self.awareness.clear_room(room_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle rooms");
            self.refresh_gauges();
        }
        evicted
    }

    pub fn stats(&self) -> CoordinatorStats {
        let registry = self.registry.stats();
        CoordinatorStats {
            rooms: registry.room_count,
            participants: registry.participant_count,
            connections: self.outboxes.len(),
            awareness_states: self.awareness.len(),
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn observe(&self, observed: Observed) {
        if let Some(metrics) = &self.metrics {
            metrics.record(observed);
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn observe(&self, _observed: Observed) {}

    #[cfg(feature = "metrics")]
    fn refresh_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            let stats = self.registry.stats();
            metrics.set_room_counts(stats.room_count, stats.participant_count);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn refresh_gauges(&self) {}
}

impl Outbound for Coordinator {
    fn deliver(&self, to: &ConnectionId, event: RoomEvent) -> bool {
        self.send(to, ServerMessage::from(event))
    }
}

fn transport_of(connection_id: &ConnectionId) -> &'static str {
    match connection_id.as_str().split(':').next() {
        Some("tcp") => "tcp",
        Some("ws") => "websocket",
        _ => "other",
    }
}
