//! In-memory storage backend

use crate::{PersistedRoom, RoomStore, StoreError, StoreStats};
use async_trait::async_trait;
use codesync_core::{now_millis, RoomId};
use dashmap::DashMap;

/// In-memory storage backend
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: DashMap<RoomId, PersistedRoom>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn save(&self, room_id: &RoomId, content: &str, language: &str) -> Result<PersistedRoom, StoreError> {
        let record = PersistedRoom {
            room_id: room_id.clone(),
            content: content.to_string(),
            language: language.to_string(),
            last_updated: now_millis(),
        };
        self.rooms.insert(room_id.clone(), record.clone());
        Ok(record)
    }

    async fn load(&self, room_id: &RoomId) -> Result<Option<PersistedRoom>, StoreError> {
        Ok(self.rooms.get(room_id).map(|r| r.value().clone()))
    }

    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        Ok(self.rooms.remove(room_id).is_some())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<RoomId>, StoreError> {
        let mut ids: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| prefix.map_or(true, |p| entry.key().as_str().starts_with(p)))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            room_count: self.rooms.len(),
            total_content_bytes: self.rooms.iter().map(|r| r.content.len()).sum(),
        })
    }
}
