use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct BatchWindow {
    start: Instant,
    end: Option<Instant>,
}

/// Success/error counters and wall-clock window for one batch of uploads
///
/// Completions may be recorded from many workers at once; the counters are
/// atomic and the time window sits behind a short-lived mutex.
#[derive(Debug)]
pub struct PerformanceMonitor {
    total_items: usize,
    success_count: AtomicU64,
    error_count: AtomicU64,
    window: Mutex<BatchWindow>,
}

impl PerformanceMonitor {
    /// Start monitoring a batch of `total_items` items now
    pub fn new(total_items: usize) -> Self {
        Self::started_at(total_items, Instant::now())
    }

    /// Start monitoring a batch whose clock started at `start`
    pub fn started_at(total_items: usize, start: Instant) -> Self {
        Self {
            total_items,
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            window: Mutex::new(BatchWindow { start, end: None }),
        }
    }

    /// Record the completion of a single item upload
    pub fn record_completion(&self, success: bool) {
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark the batch as complete and record the end time
    pub fn finish_batch(&self) {
        self.finish_batch_at(Instant::now());
    }

    /// Mark the batch as complete at `end`
    pub fn finish_batch_at(&self, end: Instant) {
        self.window().end = Some(end);
    }

    /// Successful items per second; 0 until the batch is finished
    pub fn get_throughput(&self) -> f64 {
        let duration = self.get_duration();
        if duration <= 0.0 {
            return 0.0;
        }
        self.success_count() as f64 / duration
    }

    /// Fraction of processed items that failed; 0 if nothing was processed
    pub fn get_error_rate(&self) -> f64 {
        let success = self.success_count();
        let errors = self.error_count();
        let total_processed = success + errors;
        if total_processed == 0 {
            return 0.0;
        }
        errors as f64 / total_processed as f64
    }

    /// Batch duration in seconds; 0 until the batch is finished
    pub fn get_duration(&self) -> f64 {
        let window = *self.window();
        match window.end {
            Some(end) => end
                .checked_duration_since(window.start)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Reset the monitor for a new batch, keeping `total_items`
    pub fn reset(&self) {
        let mut window = self.window();
        self.success_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        window.start = Instant::now();
        window.end = None;
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.window().end.is_some()
    }

    fn window(&self) -> MutexGuard<'_, BatchWindow> {
        // The window holds plain timestamps, a poisoned lock still has valid data
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initialization() {
        let monitor = PerformanceMonitor::new(100);
        assert_eq!(monitor.total_items(), 100);
        assert_eq!(monitor.success_count(), 0);
        assert_eq!(monitor.error_count(), 0);
        assert!(!monitor.is_finished());
    }

    #[test]
    fn test_record_completion_mixed() {
        let monitor = PerformanceMonitor::new(10);
        for _ in 0..7 {
            monitor.record_completion(true);
        }
        for _ in 0..3 {
            monitor.record_completion(false);
        }
        assert_eq!(monitor.success_count(), 7);
        assert_eq!(monitor.error_count(), 3);
    }

    #[test]
    fn test_overcounting_is_allowed() {
        let monitor = PerformanceMonitor::new(1);
        monitor.record_completion(true);
        monitor.record_completion(true);
        assert_eq!(monitor.success_count(), 2);
    }

    #[test]
    fn test_error_rate_calculation() {
        let monitor = PerformanceMonitor::new(100);
        assert_eq!(monitor.get_error_rate(), 0.0);

        for _ in 0..90 {
            monitor.record_completion(true);
        }
        for _ in 0..10 {
            monitor.record_completion(false);
        }
        assert!((monitor.get_error_rate() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_and_duration_zero_before_finish() {
        let monitor = PerformanceMonitor::new(50);
        for _ in 0..50 {
            monitor.record_completion(true);
        }
        assert_eq!(monitor.get_throughput(), 0.0);
        assert_eq!(monitor.get_duration(), 0.0);
    }

    #[test]
    fn test_throughput_calculation() {
        let start = Instant::now();
        let monitor = PerformanceMonitor::started_at(100, start);
        for _ in 0..100 {
            monitor.record_completion(true);
        }
        monitor.finish_batch_at(start + Duration::from_secs(2));

        assert!((monitor.get_duration() - 2.0).abs() < 1e-9);
        assert!((monitor.get_throughput() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_yields_zero_throughput() {
        let start = Instant::now();
        let monitor = PerformanceMonitor::started_at(10, start);
        monitor.record_completion(true);
        monitor.finish_batch_at(start);
        assert_eq!(monitor.get_throughput(), 0.0);
    }

    #[test]
    fn test_end_before_start_yields_zero() {
        let start = Instant::now() + Duration::from_secs(5);
        let monitor = PerformanceMonitor::started_at(10, start);
        monitor.record_completion(true);
        monitor.finish_batch_at(Instant::now());
        assert_eq!(monitor.get_duration(), 0.0);
        assert_eq!(monitor.get_throughput(), 0.0);
    }

    #[test]
    fn test_finish_batch_overwrites_end_time() {
        let start = Instant::now();
        let monitor = PerformanceMonitor::started_at(1, start);
        monitor.finish_batch_at(start + Duration::from_secs(1));
        monitor.finish_batch_at(start + Duration::from_secs(3));
        assert!((monitor.get_duration() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let monitor = PerformanceMonitor::new(100);
        monitor.record_completion(true);
        monitor.record_completion(false);
        monitor.finish_batch();

        monitor.reset();

        assert_eq!(monitor.total_items(), 100);
        assert_eq!(monitor.success_count(), 0);
        assert_eq!(monitor.error_count(), 0);
        assert!(!monitor.is_finished());
        assert_eq!(monitor.get_duration(), 0.0);
    }

    #[test]
    fn test_concurrent_record_completion() {
        let monitor = Arc::new(PerformanceMonitor::new(8000));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        monitor.record_completion(i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(monitor.success_count(), 4000);
        assert_eq!(monitor.error_count(), 4000);
        assert!((monitor.get_error_rate() - 0.5).abs() < 1e-9);
    }
}
