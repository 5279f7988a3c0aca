//! SQLite storage backend

use crate::{PersistedRoom, RoomStore, StoreError, StoreStats};
use async_trait::async_trait;
use codesync_core::{now_millis, RoomId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite storage backend
///
/// Embedded persistence suitable for single-node deployments.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store with the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                room_id TEXT PRIMARY KEY,
                content TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT 'javascript',
                last_updated INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rooms_last_updated ON rooms(last_updated);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

fn room_id(raw: String) -> Result<RoomId, StoreError> {
    RoomId::new(raw).map_err(|e| StoreError::InvalidRecord(e.to_string()))
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn save(&self, room_id: &RoomId, content: &str, language: &str) -> Result<PersistedRoom, StoreError> {
        let now = now_millis();
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO rooms (room_id, content, language, last_updated)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(room_id) DO UPDATE SET
                content = excluded.content,
                language = excluded.language,
                last_updated = excluded.last_updated
            "#,
            params![room_id.as_str(), content, language, now as i64],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(PersistedRoom {
            room_id: room_id.clone(),
            content: content.to_string(),
            language: language.to_string(),
            last_updated: now,
        })
    }

    async fn load(&self, room_id: &RoomId) -> Result<Option<PersistedRoom>, StoreError> {
        let conn = self.conn.lock();

        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT content, language, last_updated FROM rooms WHERE room_id = ?1",
                params![room_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(|(content, language, last_updated)| PersistedRoom {
            room_id: room_id.clone(),
            content,
            language,
            last_updated: last_updated.max(0) as u64,
        }))
    }

    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();

        let affected = conn
            .execute("DELETE FROM rooms WHERE room_id = ?1", params![room_id.as_str()])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(affected > 0)
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<RoomId>, StoreError> {
        let conn = self.conn.lock();

        // Exact, case-sensitive prefix; LIKE would treat `_` as a wildcard
        let prefix = prefix.unwrap_or("");
        let mut stmt = conn
            .prepare(
                "SELECT room_id FROM rooms WHERE substr(room_id, 1, length(?1)) = ?1 ORDER BY room_id",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let raw: Vec<String> = stmt
            .query_map(params![prefix], |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        raw.into_iter().map(room_id).collect()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock();

        let (count, size): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM rooms",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(StoreStats {
            room_count: count as usize,
            total_content_bytes: size as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RoomId {
        RoomId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_save_load_delete() {
        let store = SqliteStore::in_memory().unwrap();

        let saved = store.save(&id("abc123"), "fn main() {}", "rust").await.unwrap();
        let loaded = store.load(&id("abc123")).await.unwrap().unwrap();
        assert_eq!(loaded, saved);

        assert!(store.delete(&id("abc123")).await.unwrap());
        assert!(store.load(&id("abc123")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_overwrites() {
        let store = SqliteStore::in_memory().unwrap();

        store.save(&id("abc123"), "c1", "l1").await.unwrap();
        store.save(&id("abc123"), "c2", "l2").await.unwrap();

        let loaded = store.load(&id("abc123")).await.unwrap().unwrap();
        assert_eq!(loaded.content, "c2");
        assert_eq!(loaded.language, "l2");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.room_count, 1);
        assert_eq!(stats.total_content_bytes, 2);
    }

    #[tokio::test]
    async fn test_sqlite_list_prefix() {
        let store = SqliteStore::in_memory().unwrap();
        for name in ["team-a", "team-b", "solo"] {
            store.save(&id(name), "", "javascript").await.unwrap();
        }

        assert_eq!(store.list(Some("team-")).await.unwrap(), vec![id("team-a"), id("team-b")]);
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sqlite_list_prefix_is_literal() {
        let store = SqliteStore::in_memory().unwrap();
        let memory = crate::MemoryStore::new();
        for name in ["team_a", "teamXb", "TEAM_c"] {
            store.save(&id(name), "", "javascript").await.unwrap();
            memory.save(&id(name), "", "javascript").await.unwrap();
        }

        assert_eq!(store.list(Some("team_")).await.unwrap(), vec![id("team_a")]);
        assert_eq!(store.list(Some("TEAM")).await.unwrap(), vec![id("TEAM_c")]);
        assert_eq!(
            store.list(Some("team_")).await.unwrap(),
            memory.list(Some("team_")).await.unwrap()
        );
        assert_eq!(store.list(None).await.unwrap(), memory.list(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.save(&id("durable"), "kept", "go").await.unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let loaded = store.load(&id("durable")).await.unwrap().unwrap();
        assert_eq!(loaded.content, "kept");
    }
}
