//! In-memory status store for single-process operation and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{StatusStore, StoreError, StoreResult};
use crate::models::{RequestHash, RequestRecord};

#[derive(Clone, Default)]
pub struct InMemoryStatusStore {
    records: Arc<RwLock<HashMap<RequestHash, RequestRecord>>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn lookup(&self, hash: &RequestHash) -> StoreResult<Option<RequestRecord>> {
        Ok(self.records.read().await.get(hash).cloned())
    }

    async fn save(
        &self,
        hash: &RequestHash,
        mut record: RequestRecord,
    ) -> StoreResult<RequestRecord> {
        record.hash = hash.clone();
        self.records
            .write()
            .await
            .insert(hash.clone(), record.clone());
        Ok(record)
    }

    async fn create(&self, record: RequestRecord) -> StoreResult<RequestRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.hash) {
            return Err(StoreError::AlreadyExists(record.hash));
        }
        records.insert(record.hash.clone(), record.clone());
        Ok(record)
    }
}
