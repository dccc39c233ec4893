use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_warn};

const ENV_PREFIX: &str = "RAPIDATA_";
const CONFIG_DIR_NAME: &str = ".rapidata";
/// Above this many workers the HTTP connection pool starts to become the bottleneck
const RECOMMENDED_WORKER_CEILING: usize = 200;

/// Configuration for the upload process
///
/// When dynamic workers are enabled, `max_workers` only bounds the CPU-based
/// starting point; the controller then moves freely between `min_workers` and
/// `max_workers_limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Soft ceiling for the initial worker count; the fixed count when dynamic workers are off
    pub max_workers: usize,
    /// Retries for transient transport failures
    pub max_retries: u32,
    /// Route asset uploads through the single-flight caches
    pub cache_uploads: bool,
    /// Directory of the persistent asset cache
    pub cache_location: PathBuf,
    /// Byte budget handed to the persistent asset cache
    pub cache_size_limit: u64,
    /// Adjust the worker count between batches
    pub enable_dynamic_workers: bool,
    /// Items per batch when dynamic workers are enabled
    pub batch_size: usize,
    /// Hard floor for the worker count
    pub min_workers: usize,
    /// Hard ceiling for the worker count
    pub max_workers_limit: usize,
    /// Location of the learned worker configuration document
    pub persist_config_path: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let base = config_home();
        Self {
            max_workers: 25,
            max_retries: 3,
            cache_uploads: true,
            cache_location: base.join("upload_cache"),
            cache_size_limit: 100_000_000, // 100MB
            enable_dynamic_workers: true,
            batch_size: 1000,
            min_workers: 5,
            max_workers_limit: 200,
            persist_config_path: base.join("worker_config.json"),
        }
    }
}

impl UploadConfig {
    /// Build a configuration from defaults, `.env` and `RAPIDATA_<fieldName>` variables
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from a variable lookup. Unparseable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{}{}", ENV_PREFIX, field));

        override_parsed(&mut self.max_workers, "maxWorkers", var("maxWorkers"));
        override_parsed(&mut self.max_retries, "maxRetries", var("maxRetries"));
        override_parsed(
            &mut self.cache_size_limit,
            "cacheSizeLimit",
            var("cacheSizeLimit"),
        );
        override_parsed(&mut self.batch_size, "batchSize", var("batchSize"));
        override_parsed(&mut self.min_workers, "minWorkers", var("minWorkers"));
        override_parsed(
            &mut self.max_workers_limit,
            "maxWorkersLimit",
            var("maxWorkersLimit"),
        );

        if let Some(value) = var("cacheUploads") {
            self.cache_uploads = parse_flag(&value);
        }
        if let Some(value) = var("enableDynamicWorkers") {
            self.enable_dynamic_workers = parse_flag(&value);
        }
        if let Some(value) = var("cacheLocation").filter(|v| !v.is_empty()) {
            self.cache_location = expand_home(&value);
        }
        if let Some(value) = var("persistConfigPath").filter(|v| !v.is_empty()) {
            self.persist_config_path = expand_home(&value);
        }
    }

    /// Reject values the upload core cannot work with; warn about risky ones
    pub fn validate(&self) -> AppResult<()> {
        if self.min_workers < 1 {
            return Err(AppError::ValidationError(
                "minWorkers must be at least 1".to_string(),
            ));
        }
        if self.batch_size < 10 {
            return Err(AppError::ValidationError(
                "batchSize must be at least 10".to_string(),
            ));
        }
        if self.min_workers > self.max_workers_limit {
            return Err(AppError::ValidationError(format!(
                "minWorkers ({}) cannot exceed maxWorkersLimit ({})",
                self.min_workers, self.max_workers_limit
            )));
        }
        if self.max_workers > RECOMMENDED_WORKER_CEILING {
            log_warn!(
                "maxWorkers is set to {}, which is above the recommended limit of {}. \
                 This may lead to suboptimal performance due to connection pool constraints.",
                self.max_workers,
                RECOMMENDED_WORKER_CEILING
            );
        }
        if self.max_workers_limit > RECOMMENDED_WORKER_CEILING {
            log_warn!(
                "maxWorkersLimit is set to {}, which is above the recommended limit of {}. \
                 This may lead to suboptimal performance due to connection pool constraints.",
                self.max_workers_limit,
                RECOMMENDED_WORKER_CEILING
            );
        }
        Ok(())
    }
}

fn config_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

fn override_parsed<T: FromStr>(slot: &mut T, field: &str, value: Option<String>) {
    let Some(raw) = value else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => {
            log_debug!("Config override {}{}={}", ENV_PREFIX, field, raw);
            *slot = parsed;
        }
        Err(_) => log_warn!(
            "Ignoring {}{}: '{}' is not a valid value",
            ENV_PREFIX,
            field,
            raw
        ),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    Path::new(value).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.max_workers, 25);
        assert_eq!(config.max_retries, 3);
        assert!(config.cache_uploads);
        assert!(config.enable_dynamic_workers);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.min_workers, 5);
        assert_eq!(config.max_workers_limit, 200);
        assert!(config.persist_config_path.ends_with(".rapidata/worker_config.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = UploadConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("RAPIDATA_maxWorkers", "40"),
            ("RAPIDATA_minWorkers", "2"),
            ("RAPIDATA_enableDynamicWorkers", "No"),
            ("RAPIDATA_cacheUploads", "YES"),
            ("RAPIDATA_persistConfigPath", "/tmp/workers.json"),
        ]));

        assert_eq!(config.max_workers, 40);
        assert_eq!(config.min_workers, 2);
        assert!(!config.enable_dynamic_workers);
        assert!(config.cache_uploads);
        assert_eq!(config.persist_config_path, PathBuf::from("/tmp/workers.json"));
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let mut config = UploadConfig::default();
        config.apply_env_overrides(lookup_from(&[("RAPIDATA_batchSize", "lots")]));
        assert_eq!(config.batch_size, 1000);
    }

    #[test]
    fn test_empty_path_override_is_ignored() {
        let mut config = UploadConfig::default();
        let before = config.cache_location.clone();
        config.apply_env_overrides(lookup_from(&[("RAPIDATA_cacheLocation", "")]));
        assert_eq!(config.cache_location, before);
    }

    #[test]
    fn test_validation_rejects_zero_min_workers() {
        let config = UploadConfig {
            min_workers: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_small_batches() {
        let config = UploadConfig {
            batch_size: 5,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_bounds() {
        let config = UploadConfig {
            min_workers: 50,
            max_workers_limit: 10,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_high_limits_only_warn() {
        let config = UploadConfig {
            max_workers: 500,
            max_workers_limit: 500,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
