//! Adaptive concurrency for bulk uploads
//!
//! Batches of uploads run with a worker count that is tuned between batches
//! from observed throughput and error rate, and remembered per environment
//! across runs. Asset uploads are deduplicated through single-flight caches.

pub mod modules;
pub mod shared;

pub use modules::asset::{AssetTransport, AssetUploader, HttpAssetTransport, HttpTransportConfig};
pub use modules::cache::{CacheStorage, MemoryStorage, SingleFlightCache, SledStorage};
pub use modules::upload::{
    BatchUploader, DynamicWorkerController, PerformanceMonitor, UploadOperation, UploadSummary,
    WorkerConfigPersistence, WorkerConfigRepository,
};
pub use shared::utils::{init_logger, RetryPolicy};
pub use shared::{AppError, AppResult, UploadConfig};
