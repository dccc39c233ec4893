//! Asset uploads deduplicated through single-flight caches
//!
//! URLs and local files go through separate caches. URL results live in
//! memory for the life of the process; file results are kept on disk so a
//! re-run of the same job skips files that were already uploaded, as long as
//! their size and modification time are unchanged. Uploaders pointed at the
//! same cache location share one open disk store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use regex::Regex;

use crate::modules::asset::domain::AssetTransport;
use crate::modules::cache::{CacheStorage, MemoryStorage, SingleFlightCache, SledStorage};
use crate::shared::config::UploadConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::LogContext;
use crate::{log_debug, log_info, log_warn};

pub struct AssetUploader {
    transport: Arc<dyn AssetTransport>,
    environment: String,
    cache_uploads: AtomicBool,
    url_pattern: Regex,
    url_cache: SingleFlightCache<String>,
    file_cache: SingleFlightCache<String>,
    /// Absolute location of the disk store in use; `None` when not disk-backed
    file_location: Mutex<Option<PathBuf>>,
}

type FileStore = SledStorage<String>;

/// Disk stores open in this process, by absolute location
static FILE_STORES: OnceLock<DashMap<PathBuf, Weak<FileStore>>> = OnceLock::new();

impl AssetUploader {
    pub fn new(
        config: &UploadConfig,
        environment: impl Into<String>,
        transport: Arc<dyn AssetTransport>,
    ) -> AppResult<Self> {
        let opened = std::path::absolute(&config.cache_location)
            .map_err(AppError::from)
            .and_then(|location| {
                let storage = shared_file_storage(&location, config.cache_size_limit)?;
                Ok((storage, location))
            });

        let (file_storage, location): (Arc<dyn CacheStorage<String>>, _) = match opened {
            Ok((storage, location)) => (storage as Arc<dyn CacheStorage<String>>, Some(location)),
            Err(e) => {
                log_warn!(
                    "Failed to open file cache at {}, using memory: {}",
                    config.cache_location.display(),
                    e
                );
                (Arc::new(MemoryStorage::new()), None)
            }
        };

        let uploader = Self::with_file_storage(config, environment, transport, file_storage)?;
        uploader.set_file_location(location);
        Ok(uploader)
    }

    /// Same as [`new`](Self::new) with an explicit file cache store
    pub fn with_file_storage(
        config: &UploadConfig,
        environment: impl Into<String>,
        transport: Arc<dyn AssetTransport>,
        file_storage: Arc<dyn CacheStorage<String>>,
    ) -> AppResult<Self> {
        let url_pattern = Regex::new(r"^https?://")
            .map_err(|e| AppError::InternalError(format!("Invalid URL pattern: {}", e)))?;

        Ok(Self {
            transport,
            environment: environment.into(),
            cache_uploads: AtomicBool::new(config.cache_uploads),
            url_pattern,
            url_cache: SingleFlightCache::new("URL cache"),
            file_cache: SingleFlightCache::with_storage("File cache", file_storage),
            file_location: Mutex::new(None),
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Upload a URL or local file path, returning the remote file name
    pub async fn upload_asset(&self, asset: &str) -> AppResult<String> {
        LogContext::asset_upload("source", asset, None);

        if self.url_pattern.is_match(asset) {
            self.upload_url_asset(asset).await
        } else {
            self.upload_file_asset(Path::new(asset)).await
        }
    }

    /// Apply a new configuration; the file cache moves only if its location changed
    ///
    /// A store that is already open keeps its original size limit. Failures
    /// keep the old store.
    pub async fn apply_config(&self, config: &UploadConfig) {
        log_debug!("Updating file cache with new config");
        self.cache_uploads
            .store(config.cache_uploads, Ordering::SeqCst);

        let location = match std::path::absolute(&config.cache_location) {
            Ok(location) => location,
            Err(e) => {
                log_warn!("Failed to update file cache: {}", e);
                return;
            }
        };
        if self.file_location().as_deref() == Some(location.as_path()) {
            log_debug!("File cache already open at {}", location.display());
            return;
        }

        match shared_file_storage(&location, config.cache_size_limit) {
            Ok(storage) => {
                self.file_cache.set_storage(storage).await;
                log_info!(
                    "File cache updated: location={}, size_limit={}",
                    location.display(),
                    config.cache_size_limit
                );
                self.set_file_location(Some(location));
            }
            Err(e) => log_warn!("Failed to update file cache: {}", e),
        }
    }

    /// Forget every cached upload
    pub async fn clear_cache(&self) -> AppResult<()> {
        self.file_cache.clear().await?;
        self.url_cache.clear().await?;
        log_info!("Upload cache cleared");
        Ok(())
    }

    async fn upload_url_asset(&self, url: &str) -> AppResult<String> {
        let upload = || async {
            let uploaded = self.transport.upload_url(url).await;
            if let Ok(file_name) = &uploaded {
                LogContext::asset_upload("URL", url, Some(file_name));
            }
            uploaded
        };

        if !self.cache_uploads.load(Ordering::SeqCst) {
            return upload().await;
        }

        self.url_cache
            .get_or_fetch(&self.url_cache_key(url), upload, true)
            .await
    }

    async fn upload_file_asset(&self, path: &Path) -> AppResult<String> {
        let upload = || async {
            let uploaded = self.transport.upload_file(path).await;
            if let Ok(file_name) = &uploaded {
                LogContext::asset_upload("file", &path.display().to_string(), Some(file_name));
            }
            uploaded
        };

        if !self.cache_uploads.load(Ordering::SeqCst) {
            return upload().await;
        }

        // Checked before any fetch so a missing file never occupies a slot
        let key = self.file_cache_key(path)?;
        self.file_cache.get_or_fetch(&key, upload, true).await
    }

    fn file_location(&self) -> Option<PathBuf> {
        self.file_location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_file_location(&self, location: Option<PathBuf>) {
        *self
            .file_location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = location;
    }

    fn url_cache_key(&self, url: &str) -> String {
        format!("{}@{}", self.environment, url)
    }

    fn file_cache_key(&self, path: &Path) -> AppResult<String> {
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("File not found: {}", path.display()))
            }
            _ => AppError::from(e),
        })?;
        if !metadata.is_file() {
            return Err(AppError::InvalidInput(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let mtime_ns = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();

        Ok(format!(
            "{}@{}:{}:{}",
            self.environment,
            path.display(),
            metadata.len(),
            mtime_ns
        ))
    }
}

/// Open disk store at `location`, reusing the one already open in this process
///
/// sled holds an exclusive lock on its directory, so a second open of the
/// same location would fail while the first store is alive.
fn shared_file_storage(location: &Path, size_limit: u64) -> AppResult<Arc<FileStore>> {
    let stores = FILE_STORES.get_or_init(DashMap::new);
    let mut slot = stores.entry(location.to_path_buf()).or_default();

    if let Some(store) = slot.upgrade() {
        log_debug!("Reusing open file cache at {}", location.display());
        return Ok(store);
    }

    let store = Arc::new(FileStore::open(location, size_limit)?);
    *slot = Arc::downgrade(&store);
    Ok(store)
}
