//! SQLite store backend
//!
//! One row per key. The `version` column is the optimistic lock: a write
//! only lands if the row still carries the version the writer read.

use super::{StoreBackend, StoreError, StoreResult, Versioned};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversation_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    version INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_state_expires ON conversation_state(expires_at);
";

/// Thread-safe SQLite handle
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // WAL lets several processes share the file while one of them writes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Transport("sqlite connection lock poisoned".to_string()))
    }

    /// Delete expired rows. Reads already ignore them; this only reclaims space.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM conversation_state WHERE expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

#[async_trait]
impl StoreBackend for SqliteStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let row: Option<(String, i64)> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT value, version FROM conversation_state WHERE key = ?1 AND expires_at > ?2",
                params![key, now_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        row.map(|(raw, version)| {
            let value = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })?;
            Ok(Versioned {
                value,
                version: u64::try_from(version).unwrap_or_default(),
            })
        })
        .transpose()
    }

    async fn write(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &Value,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let now = now_millis();
        let expires_at = expiry_millis(ttl);
        let conn = self.conn()?;

        let changed = match expected {
            // Create, or take over a row whose TTL has lapsed
            None => conn.execute(
                "INSERT INTO conversation_state (key, value, version, expires_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    version = conversation_state.version + 1,
                    expires_at = excluded.expires_at
                 WHERE conversation_state.expires_at <= ?4",
                params![key, raw, expires_at, now],
            )?,
            Some(version) => conn.execute(
                "UPDATE conversation_state
                 SET value = ?1, version = version + 1, expires_at = ?2
                 WHERE key = ?3 AND version = ?4 AND expires_at > ?5",
                params![
                    raw,
                    expires_at,
                    key,
                    i64::try_from(version).unwrap_or(i64::MAX),
                    now
                ],
            )?,
        };

        Ok(changed == 1)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM conversation_state WHERE key = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AtomicStore;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = AtomicStore::new(Arc::new(SqliteStore::open_in_memory().unwrap()), 3);

        assert_eq!(store.get("channel:whatsapp:1").await.unwrap(), None);

        store
            .set("channel:whatsapp:1", json!({"a": 1}), TTL)
            .await
            .unwrap();
        assert_eq!(
            store.get("channel:whatsapp:1").await.unwrap(),
            Some(json!({"a": 1}))
        );

        store
            .set("channel:whatsapp:1", json!({"a": 2}), TTL)
            .await
            .unwrap();
        assert_eq!(
            store.get("channel:whatsapp:1").await.unwrap(),
            Some(json!({"a": 2}))
        );

        store.delete("channel:whatsapp:1").await.unwrap();
        assert_eq!(store.get("channel:whatsapp:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_version_check_rejects_stale_writer() {
        let backend = SqliteStore::open_in_memory().unwrap();

        assert!(backend.write("k", None, &json!(1), TTL).await.unwrap());
        let read = backend.read("k").await.unwrap().unwrap();
        assert_eq!(read.version, 1);

        assert!(backend.write("k", Some(1), &json!(2), TTL).await.unwrap());
        assert!(!backend.write("k", Some(1), &json!(3), TTL).await.unwrap());
        assert!(!backend.write("k", None, &json!(4), TTL).await.unwrap());

        let read = backend.read("k").await.unwrap().unwrap();
        assert_eq!(read.value, json!(2));
        assert_eq!(read.version, 2);
    }

    #[tokio::test]
    async fn test_expired_rows_are_absent_and_purged() {
        let backend = SqliteStore::open_in_memory().unwrap();
        backend
            .write("k", None, &json!("old"), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(backend.read("k").await.unwrap().is_none());
        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert!(backend.write("k", None, &json!("new"), TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_row_can_be_recreated_without_purge() {
        let backend = SqliteStore::open_in_memory().unwrap();
        backend
            .write("k", None, &json!("old"), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(backend.write("k", None, &json!("new"), TTL).await.unwrap());
        let read = backend.read("k").await.unwrap().unwrap();
        assert_eq!(read.value, json!("new"));
        assert_eq!(read.version, 2);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = AtomicStore::new(Arc::new(SqliteStore::open(&path).unwrap()), 3);
            store.set("k", json!({"kept": true}), TTL).await.unwrap();
        }

        let store = AtomicStore::new(Arc::new(SqliteStore::open(&path).unwrap()), 3);
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"kept": true})));
    }
}
