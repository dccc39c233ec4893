/// Durable store of learned worker counts, partitioned by environment
///
/// Implementations are best-effort: failures are logged by the store and
/// surface as "nothing learned" on load or a skipped write on save.
#[cfg_attr(test, mockall::automock)]
pub trait WorkerConfigRepository: Send + Sync {
    /// Previously learned worker count for `environment`, if any
    fn load_optimal_workers(&self, environment: &str) -> Option<usize>;

    /// Record `workers` as the learned count for `environment`
    fn save_optimal_workers(&self, environment: &str, workers: usize, sample_count: u64);
}
