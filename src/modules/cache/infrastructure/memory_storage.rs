use async_trait::async_trait;
use dashmap::DashMap;

use crate::modules::cache::domain::CacheStorage;
use crate::shared::errors::AppResult;

/// Process-local cache storage
#[derive(Debug)]
pub struct MemoryStorage<V> {
    entries: DashMap<String, V>,
}

impl<V> MemoryStorage<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for MemoryStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheStorage<V> for MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> AppResult<Option<V>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: V) -> AppResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        self.entries.clear();
        Ok(())
    }
}
