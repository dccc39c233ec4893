use async_trait::async_trait;

use crate::shared::errors::AppResult;

/// Key-value backing store behind a [`SingleFlightCache`](crate::modules::cache::SingleFlightCache)
///
/// The cache depends only on this capability set, so process-local and
/// persistent stores are interchangeable at runtime.
#[async_trait]
pub trait CacheStorage<V>: Send + Sync {
    /// Cached value for `key`, if present
    async fn get(&self, key: &str) -> AppResult<Option<V>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: V) -> AppResult<()>;

    /// Remove every entry
    async fn clear(&self) -> AppResult<()>;

    /// Release underlying resources once the store is no longer used
    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}
