use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::modules::upload::domain::{
    detect_cpu_count, DynamicWorkerController, PerformanceMonitor, WorkerConfigRepository,
};
use crate::shared::config::UploadConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use crate::shared::utils::RetryPolicy;
use crate::{log_debug, log_info, log_warn};

/// One upload of a single item
///
/// An `Err` is retried per the uploader's [`RetryPolicy`]; only the final
/// outcome counts as a completion.
#[async_trait]
pub trait UploadOperation<T: Sync>: Send + Sync {
    async fn upload(&self, item: &T) -> AppResult<()>;
}

/// Outcome of an upload job
#[derive(Debug, Default)]
pub struct UploadSummary {
    /// Indices of items that uploaded successfully
    pub successful: Vec<usize>,
    /// Indices of items that failed, with their error
    pub failed: Vec<(usize, AppError)>,
    /// Worker count each batch ran with
    pub batch_workers: Vec<usize>,
    pub duration: Duration,
}

impl UploadSummary {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Runs upload jobs in batches, resizing concurrency between batches
pub struct BatchUploader {
    config: UploadConfig,
    environment: String,
    persistence: Arc<dyn WorkerConfigRepository>,
    cpu_count: Option<usize>,
    retry_policy: RetryPolicy,
}

impl BatchUploader {
    pub fn new(
        config: UploadConfig,
        environment: impl Into<String>,
        persistence: Arc<dyn WorkerConfigRepository>,
    ) -> Self {
        Self {
            retry_policy: RetryPolicy::from_config(&config),
            config,
            environment: environment.into(),
            persistence,
            cpu_count: detect_cpu_count(),
        }
    }

    /// Override the per-item retry schedule
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Override CPU detection used to seed the first batch
    pub fn with_cpu_count(mut self, cpu_count: Option<usize>) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Upload every item, returning which ones succeeded
    pub async fn upload_all<T>(&self, items: &[T], operation: &dyn UploadOperation<T>) -> UploadSummary
    where
        T: Sync,
    {
        let started = Instant::now();
        let mut summary = UploadSummary::default();
        if items.is_empty() {
            return summary;
        }

        if self.config.enable_dynamic_workers {
            self.upload_dynamic(items, operation, &mut summary).await;
        } else {
            let workers = self.config.max_workers.max(1);
            let monitor = PerformanceMonitor::new(items.len());
            let timer = TimedOperation::new("static upload");
            run_batch(items, 0, workers, operation, &self.retry_policy, &monitor, &mut summary).await;
            monitor.finish_batch();
            timer.finish();
            summary.batch_workers.push(workers);
            LogContext::batch_summary(
                1,
                1,
                workers,
                monitor.success_count(),
                monitor.error_count(),
                monitor.get_throughput(),
            );
        }

        summary.duration = started.elapsed();
        log_info!(
            "Upload complete: {} successful, {} failed in {:.1}s",
            summary.successful.len(),
            summary.failed.len(),
            summary.duration.as_secs_f64()
        );
        summary
    }

    async fn upload_dynamic<T>(
        &self,
        items: &[T],
        operation: &dyn UploadOperation<T>,
        summary: &mut UploadSummary,
    ) where
        T: Sync,
    {
        let mut controller = DynamicWorkerController::with_cpu_count(
            &self.config,
            self.environment.clone(),
            Arc::clone(&self.persistence),
            self.cpu_count,
        );

        let batch_size = self.config.batch_size.max(1);
        let total_batches = items.len().div_ceil(batch_size);
        let monitor = PerformanceMonitor::new(batch_size);

        for (batch_index, chunk) in items.chunks(batch_size).enumerate() {
            let workers = controller.current_workers();
            let offset = batch_index * batch_size;
            let timer = TimedOperation::new(&format!("batch {}/{}", batch_index + 1, total_batches));

            monitor.reset();
            run_batch(chunk, offset, workers, operation, &self.retry_policy, &monitor, summary).await;
            monitor.finish_batch();
            timer.finish_with_info(&format!("{} items, {} workers", chunk.len(), workers));

            summary.batch_workers.push(workers);
            controller.record_batch_complete(&monitor);
            LogContext::batch_summary(
                batch_index + 1,
                total_batches,
                workers,
                monitor.success_count(),
                monitor.error_count(),
                monitor.get_throughput(),
            );

            if batch_index + 1 < total_batches {
                let (next, reason) = controller.calculate_adjustment(&monitor);
                if next != workers {
                    log_info!("Adjusting workers {} -> {}: {}", workers, next, reason);
                } else {
                    log_debug!("Keeping {} workers: {}", workers, reason);
                }
                controller.set_current_workers(next);
            }
        }

        controller.finalize_upload();
    }
}

async fn run_batch<T>(
    chunk: &[T],
    offset: usize,
    workers: usize,
    operation: &dyn UploadOperation<T>,
    retry_policy: &RetryPolicy,
    monitor: &PerformanceMonitor,
    summary: &mut UploadSummary,
) where
    T: Sync,
{
    let outcomes: Vec<(usize, AppResult<()>)> = stream::iter(chunk.iter().enumerate())
        .map(|(i, item)| async move {
            let index = offset + i;
            let result = upload_with_retries(operation, item, index, retry_policy).await;
            monitor.record_completion(result.is_ok());
            (index, result)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    for (index, result) in outcomes {
        match result {
            Ok(()) => summary.successful.push(index),
            Err(e) => summary.failed.push((index, e)),
        }
    }
}

/// Upload one item, retrying failures with backoff; returns the final outcome
async fn upload_with_retries<T>(
    operation: &dyn UploadOperation<T>,
    item: &T,
    index: usize,
    retry_policy: &RetryPolicy,
) -> AppResult<()>
where
    T: Sync,
{
    let attempts = retry_policy.total_attempts();
    let mut attempt = 0;

    loop {
        match operation.upload(item).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < attempts => {
                let delay = retry_policy.calculate_delay(attempt, None);
                log_debug!(
                    "Item {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    index,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log_warn!("Item {} failed after {} attempts: {}", index, attempts, e);
                return Err(e);
            }
        }
    }
}
