//! Redis store backend
//!
//! Values are wrapped in a `{version, value}` envelope. A write watches the
//! key on a dedicated connection, checks the envelope version, and commits in
//! a MULTI/EXEC block; a nil EXEC reply means the watch fired.

use super::{StoreBackend, StoreError, StoreResult, Versioned};
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    value: Value,
}

pub struct RedisStore {
    client: ::redis::Client,
    /// Shared connection for plain reads and deletes
    shared: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = ::redis::Client::open(url)?;
        let shared = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, shared })
    }
}

fn decode(key: &str, raw: &str) -> StoreResult<Envelope> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let mut conn = self.shared.clone();
        let raw: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;

        raw.map(|raw| {
            decode(key, &raw).map(|e| Versioned {
                value: e.value,
                version: e.version,
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
        // WATCH is connection-scoped, so it cannot ride on the shared multiplexed connection
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let () = ::redis::cmd("WATCH").arg(key).query_async(&mut conn).await?;
        let raw: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        let current = raw.map(|r| decode(key, &r)).transpose()?.map(|e| e.version);

        if current != expected {
            let () = ::redis::cmd("UNWATCH").query_async(&mut conn).await?;
            return Ok(false);
        }

        let envelope = Envelope {
            version: expected.unwrap_or(0) + 1,
            value: value.clone(),
        };
        let payload = serde_json::to_string(&envelope).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let committed: Option<::redis::Value> = ::redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(committed.is_some())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.shared.clone();
        let _removed: i64 = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
