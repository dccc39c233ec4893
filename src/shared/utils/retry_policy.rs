//! Backoff schedule shared by item uploads and HTTP requests

use std::time::Duration;

use crate::shared::config::UploadConfig;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single wait
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Per-item policy: waits 1s, 2s, 4s, ... between attempts
    pub fn for_items(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
            backoff_multiplier: 2.0,
        }
    }

    /// Per-request policy for the asset API
    pub fn for_requests(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_backoff: true,
            backoff_multiplier: 2.0,
        }
    }

    /// Item policy with the configured `maxRetries`
    pub fn from_config(config: &UploadConfig) -> Self {
        Self::for_items(config.max_retries)
    }

    /// Retry immediately; for callers that pace themselves
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_backoff: false,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        // Server-provided Retry-After wins, within bounds
        if let Some(server_delay) = retry_after {
            return server_delay.min(self.max_delay);
        }

        let delay = if self.exponential_backoff {
            let multiplier = self.backoff_multiplier.powi(attempt as i32);
            Duration::from_millis((self.base_delay.as_millis() as f64 * multiplier) as u64)
        } else {
            self.base_delay
        };

        delay.min(self.max_delay)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_items(3)
    }
}
