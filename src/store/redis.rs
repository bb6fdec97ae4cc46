//! Redis-backed status store shared by every broker process.
//!
//! Each record is one JSON string under `querybroker:request:<hash>`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::backend::{StatusStore, StoreError, StoreResult};
use crate::models::{RequestHash, RequestRecord};

/// Key prefix for request records in Redis.
const KEY_PREFIX: &str = "querybroker:request:";

#[derive(Clone)]
pub struct RedisStatusStore {
    conn: ConnectionManager,
}

impl RedisStatusStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }

    fn record_key(hash: &RequestHash) -> String {
        format!("{}{}", KEY_PREFIX, hash)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn lookup(&self, hash: &RequestHash) -> StoreResult<Option<RequestRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::record_key(hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        hash: &RequestHash,
        mut record: RequestRecord,
    ) -> StoreResult<RequestRecord> {
        record.hash = hash.clone();
        let body = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::record_key(hash), body)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(record)
    }

    async fn create(&self, record: RequestRecord) -> StoreResult<RequestRecord> {
        let body = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        // SET NX replies OK when the key was written and nil when it existed.
        let written: Option<String> = redis::cmd("SET")
            .arg(Self::record_key(&record.hash))
            .arg(body)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match written {
            Some(_) => Ok(record),
            None => Err(StoreError::AlreadyExists(record.hash)),
        }
    }
}
