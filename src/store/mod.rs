//! Content-addressed status store for request records.
//!
//! Pluggable backends:
//! - In-memory (default, single process, ephemeral)
//! - Redis (shared between ingester, updater and gateway processes)

mod backend;
mod memory;

#[cfg(feature = "redis-backend")]
mod redis;

use std::sync::Arc;

pub use backend::{StatusStore, StoreError, StoreResult};
pub use memory::InMemoryStatusStore;

#[cfg(feature = "redis-backend")]
pub use redis::RedisStatusStore;

/// Open the store named by `url`: `memory` or `redis://...`.
pub async fn connect(url: &str) -> StoreResult<Arc<dyn StatusStore>> {
    if url == "memory" || url.is_empty() {
        tracing::debug!("Using in-memory status store");
        return Ok(Arc::new(InMemoryStatusStore::new()));
    }

    #[cfg(feature = "redis-backend")]
    {
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            tracing::debug!("Using Redis status store");
            return Ok(Arc::new(RedisStatusStore::new(url).await?));
        }
    }

    Err(StoreError::Unavailable(format!(
        "unsupported store URL '{}'",
        url
    )))
}
