//! Adaptive batch uploads
//!
//! The domain layer measures batches and decides worker counts, the
//! infrastructure layer remembers learned counts on disk, and the
//! application layer drives a whole upload job through both.
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-exports for easy external access
pub use application::{BatchUploader, UploadOperation, UploadSummary};
pub use domain::{DynamicWorkerController, PerformanceMonitor, WorkerConfigRepository};
pub use infrastructure::WorkerConfigPersistence;
