//! Adaptive worker count controller
//!
//! Uses Additive Increase / Multiplicative Decrease (AIMD) between batches:
//! the worker count shrinks sharply when errors or throughput drops show up
//! and grows in small steps while batches stay healthy. The last learned
//! value is persisted per environment so the next job starts warm.

use std::sync::Arc;

use crate::modules::upload::domain::{PerformanceMonitor, WorkerConfigRepository};
use crate::shared::config::UploadConfig;
use crate::log_info;

/// Error rate above which the worker count is cut hard
const HIGH_ERROR_RATE: f64 = 0.05;
/// Error rate below which a cautious increase is allowed
const HEALTHY_ERROR_RATE: f64 = 0.03;
/// Throughput ratio below which the previous step is considered harmful
const DEGRADATION_RATIO: f64 = 0.85;
/// Throughput ratio above which growth is accelerated
const IMPROVEMENT_RATIO: f64 = 1.05;

const ERROR_DECREASE_FACTOR: f64 = 0.7;
const DEGRADATION_DECREASE_FACTOR: f64 = 0.85;
const IMPROVEMENT_INCREASE_FACTOR: f64 = 1.2;
const CAUTIOUS_INCREASE_FACTOR: f64 = 1.1;

const WORKERS_PER_CPU: usize = 2;
const FALLBACK_CPU_COUNT: usize = 4;

/// Controls the number of concurrent upload workers for one upload job
///
/// Driven by a single coordinating task between batches; the uploads it
/// sizes run in parallel, the sizing decision itself is sequential.
pub struct DynamicWorkerController {
    min_workers: usize,
    max_workers: usize,
    max_workers_limit: usize,
    environment: String,
    persistence: Arc<dyn WorkerConfigRepository>,
    current_workers: usize,
    previous_batch_throughput: Option<f64>,
    total_upload_count: u64,
}

impl DynamicWorkerController {
    /// Create a controller seeded from persisted state or the detected CPU count
    pub fn new(
        config: &UploadConfig,
        environment: impl Into<String>,
        persistence: Arc<dyn WorkerConfigRepository>,
    ) -> Self {
        Self::with_cpu_count(config, environment, persistence, detect_cpu_count())
    }

    /// Create a controller with an explicit CPU count (`None` = unknown)
    pub fn with_cpu_count(
        config: &UploadConfig,
        environment: impl Into<String>,
        persistence: Arc<dyn WorkerConfigRepository>,
        cpu_count: Option<usize>,
    ) -> Self {
        let mut controller = Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            max_workers_limit: config.max_workers_limit,
            environment: environment.into(),
            persistence,
            current_workers: config.min_workers,
            previous_batch_throughput: None,
            total_upload_count: 0,
        };
        controller.current_workers = controller.get_initial_workers(cpu_count);
        controller
    }

    /// Initial worker count: the learned value if one exists, else `2 × CPUs`
    pub fn get_initial_workers(&self, cpu_count: Option<usize>) -> usize {
        if let Some(learned) = self.persistence.load_optimal_workers(&self.environment) {
            let clamped = self.clamp(learned);
            log_info!("Loaded learned optimal workers from disk: {}", clamped);
            return clamped;
        }

        let cpu_cores = cpu_count.filter(|&n| n > 0).unwrap_or(FALLBACK_CPU_COUNT);
        let initial = (WORKERS_PER_CPU * cpu_cores)
            .min(self.max_workers)
            .min(self.max_workers_limit)
            .max(self.min_workers);

        log_info!(
            "No learned config - starting with {} workers (CPUs: {})",
            initial,
            cpu_cores
        );
        initial
    }

    /// Add the batch's successes to the job's sample count
    pub fn record_batch_complete(&mut self, batch_monitor: &PerformanceMonitor) {
        self.total_upload_count += batch_monitor.success_count();
    }

    /// Compute the next worker count from a finished batch
    ///
    /// Rules are checked in priority order and the first match wins. Every
    /// rule except the error-rate cut records the batch throughput as the new
    /// baseline. The caller assigns the returned count via
    /// [`set_current_workers`](Self::set_current_workers).
    pub fn calculate_adjustment(&mut self, batch_monitor: &PerformanceMonitor) -> (usize, String) {
        let current_throughput = batch_monitor.get_throughput();
        let error_rate = batch_monitor.get_error_rate();

        if error_rate > HIGH_ERROR_RATE {
            let new = self.scale_down(ERROR_DECREASE_FACTOR);
            let reason = format!(
                "Error rate too high ({:.1}%) - reducing load",
                error_rate * 100.0
            );
            return (new, reason);
        }

        // A zero baseline carries no ratio information
        let baseline = self.previous_batch_throughput.filter(|&t| t > 0.0);

        if let Some(previous) = baseline {
            let degradation_ratio = current_throughput / previous;

            if degradation_ratio < DEGRADATION_RATIO {
                let new = self.scale_down(DEGRADATION_DECREASE_FACTOR);
                let reason = format!(
                    "Performance degraded ({:.2}x) - likely hit capacity limit",
                    degradation_ratio
                );
                self.previous_batch_throughput = Some(current_throughput);
                return (new, reason);
            }
        }

        if let Some(previous) = baseline {
            let improvement_ratio = current_throughput / previous;

            if error_rate < HIGH_ERROR_RATE && improvement_ratio > IMPROVEMENT_RATIO {
                let new = self.scale_up(IMPROVEMENT_INCREASE_FACTOR);
                let reason = format!(
                    "Performance improving ({:.2}x) - scaling up",
                    improvement_ratio
                );
                self.previous_batch_throughput = Some(current_throughput);
                return (new, reason);
            }
        }

        if error_rate < HEALTHY_ERROR_RATE {
            let new = self.scale_up(CAUTIOUS_INCREASE_FACTOR);
            if new > self.current_workers {
                self.previous_batch_throughput = Some(current_throughput);
                return (new, "Stable performance - cautious increase".to_string());
            }
        }

        let reason = format!(
            "Performance acceptable - maintaining {} workers",
            self.current_workers
        );
        self.previous_batch_throughput = Some(current_throughput);
        (self.current_workers, reason)
    }

    /// Persist the learned worker count, unless the job uploaded nothing
    pub fn finalize_upload(&self) {
        if self.total_upload_count == 0 {
            return;
        }
        self.persistence.save_optimal_workers(
            &self.environment,
            self.current_workers,
            self.total_upload_count,
        );
        log_info!(
            "Saved learned workers ({}) to disk for {}",
            self.current_workers,
            self.environment
        );
    }

    /// Assign the worker count for the next batch, clamped into bounds
    pub fn set_current_workers(&mut self, workers: usize) {
        self.current_workers = self.clamp(workers);
    }

    pub fn current_workers(&self) -> usize {
        self.current_workers
    }

    pub fn previous_batch_throughput(&self) -> Option<f64> {
        self.previous_batch_throughput
    }

    pub fn total_upload_count(&self) -> u64 {
        self.total_upload_count
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn scale_down(&self, factor: f64) -> usize {
        ((self.current_workers as f64 * factor) as usize).max(self.min_workers)
    }

    fn scale_up(&self, factor: f64) -> usize {
        ((self.current_workers as f64 * factor) as usize).min(self.max_workers_limit)
    }

    fn clamp(&self, workers: usize) -> usize {
        workers.min(self.max_workers_limit).max(self.min_workers)
    }
}

/// Number of CPUs available to this process, if the platform reports it
pub fn detect_cpu_count() -> Option<usize> {
    std::thread::available_parallelism().map(|n| n.get()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::upload::domain::repositories::MockWorkerConfigRepository;
    use mockall::predicate::eq;
    use std::time::{Duration, Instant};

    fn config() -> UploadConfig {
        UploadConfig {
            max_workers: 25,
            min_workers: 5,
            max_workers_limit: 200,
            ..UploadConfig::default()
        }
    }

    fn empty_store() -> Arc<dyn WorkerConfigRepository> {
        let mut store = MockWorkerConfigRepository::new();
        store.expect_load_optimal_workers().return_const(None);
        store.expect_save_optimal_workers().never();
        Arc::new(store)
    }

    fn store_with(learned: usize) -> Arc<dyn WorkerConfigRepository> {
        let mut store = MockWorkerConfigRepository::new();
        store
            .expect_load_optimal_workers()
            .return_const(Some(learned));
        Arc::new(store)
    }

    /// Finished monitor with the given successes/failures over one second
    fn batch(successes: u64, failures: u64) -> PerformanceMonitor {
        let start = Instant::now();
        let monitor = PerformanceMonitor::started_at((successes + failures) as usize, start);
        for _ in 0..successes {
            monitor.record_completion(true);
        }
        for _ in 0..failures {
            monitor.record_completion(false);
        }
        monitor.finish_batch_at(start + Duration::from_secs(1));
        monitor
    }

    fn controller_at(workers: usize) -> DynamicWorkerController {
        let mut controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", empty_store(), Some(4));
        controller.set_current_workers(workers);
        controller
    }

    #[test]
    fn test_initialization() {
        let controller = controller_at(10);
        assert_eq!(controller.environment(), "production");
        assert!(controller.current_workers() >= 5);
        assert_eq!(controller.previous_batch_throughput(), None);
        assert_eq!(controller.total_upload_count(), 0);
    }

    #[test]
    fn test_initial_workers_cpu_based() {
        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", empty_store(), Some(8));
        assert_eq!(controller.current_workers(), 16);
    }

    #[test]
    fn test_initial_workers_respects_min() {
        let cfg = UploadConfig {
            min_workers: 10,
            ..config()
        };
        let controller =
            DynamicWorkerController::with_cpu_count(&cfg, "production", empty_store(), Some(4));
        assert_eq!(controller.current_workers(), 10);
    }

    #[test]
    fn test_initial_workers_respects_max() {
        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", empty_store(), Some(50));
        assert_eq!(controller.current_workers(), 25);
    }

    #[test]
    fn test_initial_workers_unknown_cpu_defaults_to_four() {
        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", empty_store(), None);
        assert_eq!(controller.current_workers(), 8);
    }

    #[test]
    fn test_learned_workers_are_used_and_clamped() {
        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", store_with(45), Some(4));
        assert_eq!(controller.current_workers(), 45);

        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", store_with(900), Some(4));
        assert_eq!(controller.current_workers(), 200);

        let controller =
            DynamicWorkerController::with_cpu_count(&config(), "production", store_with(1), Some(4));
        assert_eq!(controller.current_workers(), 5);
    }

    #[test]
    fn test_high_error_rate_cuts_workers() {
        let mut controller = controller_at(100);
        let (new, reason) = controller.calculate_adjustment(&batch(90, 10));
        assert_eq!(new, 70);
        assert!(reason.contains("Error rate too high"));
        assert!(reason.contains("10.0%"));
        // The error cut keeps the previous baseline untouched
        assert_eq!(controller.previous_batch_throughput(), None);
    }

    #[test]
    fn test_error_cut_respects_min_workers() {
        let mut controller = controller_at(6);
        let (new, _) = controller.calculate_adjustment(&batch(50, 50));
        assert_eq!(new, 5);
    }

    #[test]
    fn test_degradation_reduces_workers() {
        let mut controller = controller_at(100);
        controller.calculate_adjustment(&batch(100, 0));
        controller.set_current_workers(100);

        let (new, reason) = controller.calculate_adjustment(&batch(70, 0));
        assert_eq!(new, 85);
        assert!(reason.to_lowercase().contains("degraded"));
        assert!(reason.contains("0.70x"));
        assert_eq!(controller.previous_batch_throughput(), Some(70.0));
    }

    #[test]
    fn test_improvement_scales_up() {
        let mut controller = controller_at(100);
        controller.calculate_adjustment(&batch(100, 0));
        controller.set_current_workers(100);

        // 120 ok / 1 failed: error rate below 1%, throughput ratio 1.2
        let (new, reason) = controller.calculate_adjustment(&batch(120, 1));
        assert_eq!(new, 120);
        assert!(reason.to_lowercase().contains("improving"));
        assert_eq!(controller.previous_batch_throughput(), Some(120.0));
    }

    #[test]
    fn test_improvement_respects_max_limit() {
        let mut controller = controller_at(190);
        controller.calculate_adjustment(&batch(100, 0));
        controller.set_current_workers(190);

        let (new, _) = controller.calculate_adjustment(&batch(150, 0));
        assert_eq!(new, 200);
    }

    #[test]
    fn test_stable_performance_cautious_increase() {
        let mut controller = controller_at(100);
        // No baseline yet, error rate 2%
        let (new, reason) = controller.calculate_adjustment(&batch(98, 2));
        assert_eq!(new, 110);
        assert_eq!(reason, "Stable performance - cautious increase");
        assert_eq!(controller.previous_batch_throughput(), Some(98.0));
    }

    #[test]
    fn test_cautious_increase_without_growth_is_steady_state() {
        let mut controller = controller_at(200);
        let (new, reason) = controller.calculate_adjustment(&batch(100, 0));
        assert_eq!(new, 200);
        assert!(reason.contains("maintaining 200 workers"));
        assert_eq!(controller.previous_batch_throughput(), Some(100.0));
    }

    #[test]
    fn test_small_pool_cannot_grow_by_ten_percent() {
        // floor(5 * 1.1) == 5, so the cautious increase does not fire
        let mut controller = controller_at(5);
        let (new, reason) = controller.calculate_adjustment(&batch(100, 0));
        assert_eq!(new, 5);
        assert!(reason.starts_with("Performance acceptable"));
    }

    #[test]
    fn test_steady_state_between_thresholds() {
        let mut controller = controller_at(50);
        controller.calculate_adjustment(&batch(100, 0));
        controller.set_current_workers(50);

        // Ratio 0.96 with a 4% error rate: no rule fires
        let (new, reason) = controller.calculate_adjustment(&batch(96, 4));
        assert_eq!(new, 50);
        assert!(reason.contains("maintaining 50 workers"));
        assert_eq!(controller.previous_batch_throughput(), Some(96.0));
    }

    #[test]
    fn test_zero_baseline_skips_ratio_rules() {
        let mut controller = controller_at(50);
        controller.calculate_adjustment(&batch(0, 0));
        assert_eq!(controller.previous_batch_throughput(), Some(0.0));
        controller.set_current_workers(50);

        let (new, reason) = controller.calculate_adjustment(&batch(100, 0));
        assert_eq!(new, 55);
        assert_eq!(reason, "Stable performance - cautious increase");
    }

    #[test]
    fn test_record_batch_complete() {
        let mut controller = controller_at(10);
        controller.record_batch_complete(&batch(50, 5));
        controller.record_batch_complete(&batch(45, 0));
        assert_eq!(controller.total_upload_count(), 95);
    }

    #[test]
    fn test_finalize_without_uploads_skips_persistence() {
        let mut store = MockWorkerConfigRepository::new();
        store.expect_load_optimal_workers().return_const(None);
        store.expect_save_optimal_workers().never();

        let mut controller =
            DynamicWorkerController::with_cpu_count(&config(), "staging", Arc::new(store), Some(4));
        controller.record_batch_complete(&batch(0, 10));
        controller.finalize_upload();
    }

    #[test]
    fn test_finalize_persists_current_workers() {
        let mut store = MockWorkerConfigRepository::new();
        store.expect_load_optimal_workers().return_const(None);
        store
            .expect_save_optimal_workers()
            .with(eq("staging"), eq(42usize), eq(95u64))
            .times(1)
            .return_const(());

        let mut controller =
            DynamicWorkerController::with_cpu_count(&config(), "staging", Arc::new(store), Some(4));
        controller.record_batch_complete(&batch(95, 0));
        controller.set_current_workers(42);
        controller.finalize_upload();
    }
}
