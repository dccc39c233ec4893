pub mod performance_monitor;
pub mod repositories;
pub mod worker_controller;

pub use performance_monitor::PerformanceMonitor;
pub use repositories::WorkerConfigRepository;
pub use worker_controller::{detect_cpu_count, DynamicWorkerController};
