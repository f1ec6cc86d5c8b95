//! Atomic key/value store for conversation state
//!
//! Every mutation is an optimistic read-modify-write: read the value and its
//! version, compute the replacement, commit only if the version is unchanged.
//! A lost race re-runs the whole cycle, up to `max_retries` attempts.

mod memory;
mod redis;
mod sqlite;

pub use self::redis::RedisStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store transport error: {0}")]
    Transport(String),
    #[error("Concurrent modification of '{key}' not resolved after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
    #[error("Corrupt value stored under '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        StoreError::Transport(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: u64,
}

/// Backend primitive: versioned reads and compare-and-set writes.
///
/// Expired entries must read as absent, and a write expecting `None` must
/// succeed over an expired entry.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read the live value under `key`
    async fn read(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Commit `value` if the stored version still equals `expected`
    /// (`None` = key absent). Returns `false` when another writer got there first.
    async fn write(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &Value,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Remove the key unconditionally
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: StoreBackend + ?Sized> StoreBackend for Arc<T> {
    async fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        (**self).read(key).await
    }

    async fn write(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &Value,
        ttl: Duration,
    ) -> StoreResult<bool> {
        (**self).write(key, expected, value, ttl).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Retrying front-end over a [`StoreBackend`].
///
/// This is the only place optimistic locking happens; callers see either a
/// committed write or an error, never a partial write.
#[derive(Clone)]
pub struct AtomicStore {
    backend: Arc<dyn StoreBackend>,
    max_retries: u32,
}

impl AtomicStore {
    pub fn new(backend: Arc<dyn StoreBackend>, max_retries: u32) -> Self {
        Self {
            backend,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.backend.read(key).await?.map(|v| v.value))
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> StoreResult<()> {
        self.update(key, ttl, |_| Ok::<_, StoreError>(value.clone()))
            .await
            .map(|_| ())
    }

    #[cfg(test)]
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.backend.remove(key).await
    }

    /// Read-modify-write `key` through `f`.
    ///
    /// `f` is called once per attempt with the current value and may be
    /// called up to `max_retries` times. An error from `f` aborts without
    /// writing.
    pub async fn update<F, E>(&self, key: &str, ttl: Duration, mut f: F) -> Result<Value, E>
    where
        F: FnMut(Option<Value>) -> Result<Value, E> + Send,
        E: From<StoreError>,
    {
        for attempt in 1..=self.max_retries {
            let current = self.backend.read(key).await?;
            let expected = current.as_ref().map(|c| c.version);
            let next = f(current.map(|c| c.value))?;

            if self.backend.write(key, expected, &next, ttl).await? {
                if attempt > 1 {
                    tracing::debug!(key, attempt, "Optimistic write committed after retry");
                }
                return Ok(next);
            }

            tracing::debug!(
                key,
                attempt,
                backend = self.backend.name(),
                "Concurrent modification detected, retrying"
            );
        }

        tracing::warn!(
            key,
            attempts = self.max_retries,
            "Giving up on optimistic write"
        );
        Err(StoreError::Conflict {
            key: key.to_string(),
            attempts: self.max_retries,
        }
        .into())
    }
}
