//! CodeSync Storage Backends
//!
//! Durable, room-keyed snapshot records with upsert semantics:
//! - Memory (default): Fast, volatile storage
//! - SQLite: Embedded persistence
//! - PostgreSQL: Shared persistence
//!
//! Concurrent saves for the same room resolve last-write-wins. Every save
//! carries the full content, so no version token is needed.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use codesync_core::RoomId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The durable record of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRoom {
    pub room_id: RoomId,
    pub content: String,
    pub language: String,
    /// Milliseconds since the Unix epoch
    pub last_updated: u64,
}

/// Storage backend trait
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create or overwrite the record of a room
    async fn save(&self, room_id: &RoomId, content: &str, language: &str) -> Result<PersistedRoom, StoreError>;

    /// Load the record of a room, if one was ever saved
    async fn load(&self, room_id: &RoomId) -> Result<Option<PersistedRoom>, StoreError>;

    /// Delete the record of a room
    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    /// List room IDs, optionally restricted to a prefix
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<RoomId>, StoreError>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported store backend: {0} (not compiled in)")]
    Unsupported(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Whether the store itself is unavailable, as opposed to bad input
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Database(_) | StoreError::Connection(_))
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub room_count: usize,
    pub total_content_bytes: usize,
}

/// Open a store from a durable-store connection string.
///
/// Accepted forms: `memory:`, `sqlite::memory:`, `sqlite://<path>`,
/// `postgres://...`, `postgresql://...`.
pub async fn open(url: &str) -> Result<Arc<dyn RoomStore>, StoreError> {
    let url = url.trim();

    if url == "memory:" || url == "memory://" || url.is_empty() {
        debug!(backend = "memory", "Opening store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    if let Some(rest) = url.strip_prefix("sqlite:") {
        debug!(backend = "sqlite", location = rest, "Opening store");
        return open_sqlite(rest);
    }

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        debug!(backend = "postgres", "Opening store");
        return open_postgres(url).await;
    }

    Err(StoreError::InvalidUrl(url.to_string()))
}

#[cfg(feature = "sqlite")]
fn open_sqlite(rest: &str) -> Result<Arc<dyn RoomStore>, StoreError> {
    if rest == ":memory:" {
        return Ok(Arc::new(SqliteStore::in_memory()?));
    }
    let path = rest.strip_prefix("//").unwrap_or(rest);
    if path.is_empty() {
        return Err(StoreError::InvalidUrl(format!("sqlite:{}", rest)));
    }
    Ok(Arc::new(SqliteStore::new(path)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_rest: &str) -> Result<Arc<dyn RoomStore>, StoreError> {
    Err(StoreError::Unsupported("sqlite".into()))
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str) -> Result<Arc<dyn RoomStore>, StoreError> {
    Ok(Arc::new(PostgresStore::new(url).await?))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str) -> Result<Arc<dyn RoomStore>, StoreError> {
    Err(StoreError::Unsupported("postgres".into()))
}

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let store = open("memory:").await.unwrap();
        let id = RoomId::new("abc123").unwrap();
        store.save(&id, "x", "rust").await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().unwrap().content, "x");
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        let err = open("mongodb://localhost/codesync").await.err().unwrap();
        assert!(matches!(err, StoreError::InvalidUrl(_)));
        assert!(!err.is_transient());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_sqlite_in_memory() {
        let store = open("sqlite::memory:").await.unwrap();
        let id = RoomId::new("abc123").unwrap();
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = PersistedRoom {
            room_id: RoomId::new("abc123").unwrap(),
            content: "print(1)".into(),
            language: "python".into(),
            last_updated: 42,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["roomId"], "abc123");
        assert_eq!(json["lastUpdated"], 42);
    }
}
