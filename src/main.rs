//! Simulated upload job
//!
//! Runs a batch upload against an in-process service whose latency and
//! failure rate climb once concurrency passes its capacity. Run it a few
//! times to watch the learned worker count settle:
//!
//! ```text
//! RUST_LOG=info adaptive-upload 3000 staging
//! ```

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use adaptive_upload_lib::shared::utils::LogContext;
use adaptive_upload_lib::{
    init_logger, log_error, log_info, AppError, AppResult, BatchUploader, UploadConfig,
    UploadOperation, WorkerConfigPersistence,
};

const DEFAULT_ITEMS: usize = 2000;
const DEFAULT_ENVIRONMENT: &str = "production";

/// Fake remote service that degrades past `capacity` concurrent requests
struct SimulatedService {
    capacity: usize,
    base_latency_ms: u64,
    in_flight: AtomicUsize,
}

impl SimulatedService {
    fn new(capacity: usize, base_latency_ms: u64) -> Self {
        Self {
            capacity,
            base_latency_ms,
            in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UploadOperation<usize> for SimulatedService {
    async fn upload(&self, item: &usize) -> AppResult<()> {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let overload = concurrent.saturating_sub(self.capacity) as f64 / self.capacity as f64;

        let (latency, failed) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.8..1.2);
            let latency = self.base_latency_ms as f64 * (1.0 + overload * 2.0) * jitter;
            let failure_chance = (0.005 + overload * 0.1).min(0.5);
            (
                Duration::from_millis(latency as u64),
                rng.gen_bool(failure_chance),
            )
        };

        tokio::time::sleep(latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failed {
            Err(AppError::UploadError(format!("item {} rejected by server", item)))
        } else {
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let mut args = env::args().skip(1);
    let items: usize = match args.next() {
        Some(raw) => match raw.parse::<usize>().map_err(AppError::from) {
            Ok(items) => items,
            Err(e) => {
                LogContext::error_with_context(&e, "Invalid item count");
                return Err(e.into());
            }
        },
        None => DEFAULT_ITEMS,
    };
    let environment = args.next().unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

    let config = match UploadConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            LogContext::error_with_context(&e, "Invalid upload configuration");
            return Err(e.into());
        }
    };
    log_info!(
        "Uploading {} items to {} (batch size {}, workers {}..{})",
        items,
        environment,
        config.batch_size,
        config.min_workers,
        config.max_workers_limit
    );

    let persistence = Arc::new(WorkerConfigPersistence::new(&config.persist_config_path));
    let uploader = BatchUploader::new(config, environment, persistence);
    let service = SimulatedService::new(60, 20);

    let work: Vec<usize> = (0..items).collect();
    let summary = uploader.upload_all(&work, &service).await;
    if summary.successful.is_empty() && !summary.failed.is_empty() {
        log_error!("Every upload failed; last error: {:?}", summary.failed.last());
    }

    println!(
        "{} uploaded, {} failed in {:.1}s; workers per batch: {:?}",
        summary.successful.len(),
        summary.failed.len(),
        summary.duration.as_secs_f64(),
        summary.batch_workers
    );
    Ok(())
}
