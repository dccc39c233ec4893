pub mod file_lock;
pub mod worker_config_persistence;

pub use file_lock::FileLockGuard;
pub use worker_config_persistence::{WorkerConfigPersistence, WorkerConfigRecord};
