use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::modules::cache::domain::CacheStorage;
use crate::shared::errors::AppResult;
use crate::log_debug;

/// Persistent cache storage on an embedded sled database
///
/// Values are stored as JSON so entries survive process restarts.
pub struct SledStorage<V> {
    db: sled::Db,
    path: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> SledStorage<V> {
    /// Open (or create) the store at `path` with a page cache of `cache_capacity` bytes
    pub fn open(path: impl AsRef<Path>, cache_capacity: u64) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::Config::new()
            .path(&path)
            .cache_capacity(cache_capacity)
            .open()?;
        log_debug!("Opened disk cache at {}", path.display());
        Ok(Self {
            db,
            path,
            _value: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[async_trait]
impl<V> CacheStorage<V> for SledStorage<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> AppResult<Option<V>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V) -> AppResult<()> {
        let bytes = serde_json::to_vec(&value)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        self.db.clear()?;
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        self.db.flush_async().await?;
        log_debug!("Flushed disk cache at {}", self.path.display());
        Ok(())
    }
}
