//! Keyed fetch cache with single-flight deduplication
//!
//! Concurrent callers asking for the same key while a fetch is running all
//! wait on that one fetch and observe its result, success or failure alike.
//! A failed fetch is never cached: once it settles the slot is cleared and
//! the next caller triggers a fresh attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use super::domain::CacheStorage;
use super::infrastructure::MemoryStorage;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_warn};

/// Shared, resolve-once slot for one running fetch
type Flight<V> = watch::Receiver<Option<AppResult<V>>>;

enum Role<V> {
    Fetcher(watch::Sender<Option<AppResult<V>>>, Flight<V>),
    Waiter(Flight<V>),
    Hit(V),
}

pub struct SingleFlightCache<V> {
    name: String,
    storage: RwLock<Arc<dyn CacheStorage<V>>>,
    in_flight: Mutex<HashMap<String, Flight<V>>>,
}

impl<V> SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cache backed by process-local storage
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_storage(name, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(name: impl Into<String>, storage: Arc<dyn CacheStorage<V>>) -> Self {
        Self {
            name: name.into(),
            storage: RwLock::new(storage),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached value for `key`, or the result of a single shared `fetch_fn` run
    ///
    /// Only one caller runs `fetch_fn` per key at a time; the others wait for
    /// its outcome. With `should_cache` false the result is shared with
    /// current waiters but not stored.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch_fn: F, should_cache: bool) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        self.fetch_shared(key, fetch_fn, should_cache, None).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), failing the fetch after `timeout`
    ///
    /// The timeout bounds the fetch itself, so every waiter on the key
    /// observes the same timeout error.
    pub async fn get_or_fetch_with_timeout<F, Fut>(
        &self,
        key: &str,
        fetch_fn: F,
        should_cache: bool,
        timeout: Duration,
    ) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        self.fetch_shared(key, fetch_fn, should_cache, Some(timeout))
            .await
    }

    /// Replace the backing store; the previous store is closed afterwards
    pub async fn set_storage(&self, storage: Arc<dyn CacheStorage<V>>) {
        let previous = {
            let _flights = self.in_flight.lock().await;
            let mut current = self
                .storage
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, storage)
        };

        if let Err(e) = previous.close().await {
            log_warn!("{}: failed to close previous storage: {}", self.name, e);
        }
    }

    /// Empty the backing store; running fetches are unaffected
    pub async fn clear(&self) -> AppResult<()> {
        self.current_storage().clear().await?;
        log_debug!("{}: cleared", self.name);
        Ok(())
    }

    /// Number of keys with a fetch currently running
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn fetch_shared<F, Fut>(
        &self,
        key: &str,
        fetch_fn: F,
        should_cache: bool,
        timeout: Option<Duration>,
    ) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        // Fast path, no lock
        if let Some(cached) = self.lookup(key).await {
            log_debug!("{}: cache hit", self.name);
            return Ok(cached);
        }

        let role = {
            let mut in_flight = self.in_flight.lock().await;

            // A fetch may have completed between the fast path and the lock
            if let Some(cached) = self.lookup(key).await {
                Role::Hit(cached)
            } else {
                match in_flight.get(key).filter(|flight| !is_abandoned(flight)) {
                    Some(flight) => Role::Waiter(flight.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key.to_string(), rx.clone());
                        Role::Fetcher(tx, rx)
                    }
                }
            }
        };

        match role {
            Role::Hit(cached) => {
                log_debug!("{}: cache hit", self.name);
                Ok(cached)
            }
            Role::Waiter(flight) => {
                log_debug!("{}: waiting for in-flight request", self.name);
                self.wait_for(key, flight).await
            }
            Role::Fetcher(tx, flight) => {
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, fetch_fn()).await {
                        Ok(result) => result,
                        Err(_) => Err(AppError::ExternalServiceError(format!(
                            "{}: fetch for '{}' timed out after {:?}",
                            self.name, key, limit
                        ))),
                    },
                    None => fetch_fn().await,
                };

                if let Ok(value) = &result {
                    if should_cache {
                        match self.current_storage().set(key, value.clone()).await {
                            Ok(()) => log_debug!("{}: cached result", self.name),
                            Err(e) => log_warn!("{}: failed to cache result: {}", self.name, e),
                        }
                    }
                }

                tx.send_replace(Some(result.clone()));

                let mut in_flight = self.in_flight.lock().await;
                if in_flight
                    .get(key)
                    .is_some_and(|current| current.same_channel(&flight))
                {
                    in_flight.remove(key);
                }
                drop(in_flight);
                drop(tx);

                result
            }
        }
    }

    async fn wait_for(&self, key: &str, mut flight: Flight<V>) -> AppResult<V> {
        match flight.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(|| {
                Err(AppError::InternalError(format!(
                    "{}: in-flight fetch for '{}' resolved empty",
                    self.name, key
                )))
            }),
            Err(_) => Err(AppError::CacheError(format!(
                "{}: in-flight fetch for '{}' was abandoned",
                self.name, key
            ))),
        }
    }

    async fn lookup(&self, key: &str) -> Option<V> {
        match self.current_storage().get(key).await {
            Ok(value) => value,
            Err(e) => {
                log_warn!("{}: storage read failed, treating as miss: {}", self.name, e);
                None
            }
        }
    }

    fn current_storage(&self) -> Arc<dyn CacheStorage<V>> {
        let storage = self
            .storage
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&storage)
    }
}

/// A flight whose fetcher went away before cleaning up its slot
fn is_abandoned<V>(flight: &Flight<V>) -> bool {
    flight.has_changed().is_err()
}
