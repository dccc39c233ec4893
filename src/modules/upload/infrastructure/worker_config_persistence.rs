//! Learned worker configuration on disk
//!
//! One JSON document maps environment names to the worker count learned in
//! earlier upload jobs:
//!
//! ```json
//! { "production": { "optimal_workers": 42, "last_updated": "2025-01-01T12:00:00.000000Z", "sample_count": 1200 } }
//! ```
//!
//! Every read and read-modify-write runs under an exclusive lock on a sidecar
//! `.lock` file so concurrent processes never interleave writes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::file_lock::FileLockGuard;
use crate::modules::upload::domain::WorkerConfigRepository;
use crate::shared::errors::AppResult;
use crate::{log_debug, log_warn};

/// Per-environment entry of the worker config document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfigRecord {
    pub optimal_workers: usize,
    pub last_updated: String,
    #[serde(default)]
    pub sample_count: u64,
}

/// Persists learned worker counts across process restarts
#[derive(Debug, Clone)]
pub struct WorkerConfigPersistence {
    config_path: PathBuf,
}

impl WorkerConfigPersistence {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    /// Learned worker count for `environment`; `None` on any failure
    pub fn load_optimal_workers(&self, environment: &str) -> Option<usize> {
        match self.load_record(environment) {
            Ok(Some(record)) => {
                log_debug!(
                    "Loaded config for {}: {} workers (updated {}, {} samples)",
                    environment,
                    record.optimal_workers,
                    record.last_updated,
                    record.sample_count
                );
                Some(record.optimal_workers)
            }
            Ok(None) => None,
            Err(e) => {
                log_warn!("Failed to load worker config: {}", e);
                None
            }
        }
    }

    /// Overwrite the entry for `environment`, leaving other environments untouched
    pub fn save_optimal_workers(&self, environment: &str, workers: usize, sample_count: u64) {
        self.ensure_config_dir();

        match self.write_record(environment, workers, sample_count) {
            Ok(()) => log_debug!(
                "Saved worker config for {}: {} workers ({} samples)",
                environment,
                workers,
                sample_count
            ),
            Err(e) => log_warn!("Failed to save worker config: {}", e),
        }
    }

    /// Create the directory holding the config document
    pub fn ensure_config_dir(&self) {
        let Some(parent) = self.config_path.parent() else {
            return;
        };
        if parent.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = fs::create_dir_all(parent) {
            log_warn!("Failed to create config directory: {}", e);
        }
    }

    fn load_record(&self, environment: &str) -> AppResult<Option<WorkerConfigRecord>> {
        if !self.config_path.exists() {
            log_debug!(
                "Worker config file does not exist: {}",
                self.config_path.display()
            );
            return Ok(None);
        }

        let _lock = FileLockGuard::acquire(&self.lock_path())?;
        let raw = fs::read_to_string(&self.config_path)?;
        let document: Map<String, Value> = serde_json::from_str(&raw)?;

        match document.get(environment) {
            Some(entry) if !entry.is_null() => {
                let record = serde_json::from_value(entry.clone())?;
                Ok(Some(record))
            }
            _ => {
                log_debug!("No config found for environment: {}", environment);
                Ok(None)
            }
        }
    }

    fn write_record(&self, environment: &str, workers: usize, sample_count: u64) -> AppResult<()> {
        let _lock = FileLockGuard::acquire(&self.lock_path())?;

        let mut document = self.read_document_or_empty();
        let record = WorkerConfigRecord {
            optimal_workers: workers,
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            sample_count,
        };
        document.insert(environment.to_string(), serde_json::to_value(record)?);

        let serialized = serde_json::to_string_pretty(&Value::Object(document))?;
        fs::write(&self.config_path, serialized)?;
        Ok(())
    }

    /// Existing document, or an empty one if it is missing or unreadable
    fn read_document_or_empty(&self) -> Map<String, Value> {
        let raw = match fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(document) => document,
            Err(e) => {
                log_warn!(
                    "Worker config {} is corrupt, starting fresh: {}",
                    self.config_path.display(),
                    e
                );
                Map::new()
            }
        }
    }

    fn lock_path(&self) -> PathBuf {
        FileLockGuard::sidecar_for(&self.config_path)
    }
}

impl WorkerConfigRepository for WorkerConfigPersistence {
    fn load_optimal_workers(&self, environment: &str) -> Option<usize> {
        WorkerConfigPersistence::load_optimal_workers(self, environment)
    }

    fn save_optimal_workers(&self, environment: &str, workers: usize, sample_count: u64) {
        WorkerConfigPersistence::save_optimal_workers(self, environment, workers, sample_count)
    }
}
