//! Storage trait for request records.

use async_trait::async_trait;

use crate::models::{RequestHash, RequestRecord};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from status store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store error: {0}")]
    Backend(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Record already exists for {0}")]
    AlreadyExists(RequestHash),
}

/// Hash-keyed persistence of request records.
///
/// Keys are either a hash received on the wire or `RequestHash::from(&query)`;
/// both derive from the same canonical hashing, so they address the same record.
///
/// `lookup` followed by `save` is not atomic: two callers racing on one key
/// both succeed and the last write wins. Use `create` when only the first
/// writer may win.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch the record for `hash`, if any.
    async fn lookup(&self, hash: &RequestHash) -> StoreResult<Option<RequestRecord>>;

    /// Upsert: create or fully overwrite the record stored under `hash`.
    /// Returns the record as stored (its `hash` field set to `hash`).
    async fn save(&self, hash: &RequestHash, record: RequestRecord) -> StoreResult<RequestRecord>;

    /// Insert `record` only if nothing is stored under its hash yet.
    /// Fails with [`StoreError::AlreadyExists`] otherwise.
    async fn create(&self, record: RequestRecord) -> StoreResult<RequestRecord>;
}
