//! Process-local store backend

use super::{StoreBackend, StoreError, StoreResult, Versioned};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    version: u64,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory backend with per-key versions.
///
/// State does not survive a restart and is not shared between processes.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    /// Number of upcoming writes to reject as conflicting
    forced_conflicts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail as if another writer had won the race
    #[cfg(test)]
    pub fn inject_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Transport("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| Versioned {
                value: e.value.clone(),
                version: e.version,
            }))
    }

    async fn write(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &Value,
        ttl: Duration,
    ) -> StoreResult<bool> {
        if self.take_forced_conflict() {
            return Ok(false);
        }

        let mut entries = self.lock()?;
        let now = Instant::now();
        let existing = entries.get(key);
        let live_version = existing.filter(|e| e.is_live(now)).map(|e| e.version);

        if live_version != expected {
            return Ok(false);
        }

        let version = existing.map_or(0, |e| e.version) + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                version,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.write("k", None, &json!(1), ttl).await.unwrap());
        let first = store.read("k").await.unwrap().unwrap();

        assert!(store
            .write("k", Some(first.version), &json!(2), ttl)
            .await
            .unwrap());
        // A writer still holding the first version loses
        assert!(!store
            .write("k", Some(first.version), &json!(3), ttl)
            .await
            .unwrap());
        // Creating over a live key loses too
        assert!(!store.write("k", None, &json!(4), ttl).await.unwrap());

        assert_eq!(store.read("k").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store
            .write("k", None, &json!("short"), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.read("k").await.unwrap().is_none());
        assert!(store
            .write("k", None, &json!("fresh"), Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(store.read("k").await.unwrap().unwrap().value, json!("fresh"));
    }
}
