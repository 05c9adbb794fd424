use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Delivery counters for one job process
#[derive(Debug, Clone)]
pub struct DeliveryStats {
    metrics: Arc<Mutex<DeliveryMetrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliveryMetrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// HTTP attempts made against the listing API
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,

    /// Records accepted by the listing API
    pub records_submitted: usize,

    /// Records that exhausted their retries
    pub records_failed: usize,

    /// Records not sent because the config is in testing mode
    pub records_skipped: usize,

    /// Attempt durations in milliseconds
    pub attempt_durations: Vec<u64>,

    /// HTTP status code counts
    pub status_codes: HashMap<u16, usize>,
}

impl DeliveryMetrics {
    pub fn average_attempt_ms(&self) -> Option<u64> {
        if self.attempt_durations.is_empty() {
            return None;
        }
        Some(self.attempt_durations.iter().sum::<u64>() / self.attempt_durations.len() as u64)
    }

    /// One-line summary for the job log
    pub fn summary(&self) -> String {
        format!(
            "submitted={} failed={} skipped={} attempts={} avg_attempt_ms={}",
            self.records_submitted,
            self.records_failed,
            self.records_skipped,
            self.total_attempts,
            self.average_attempt_ms().map_or_else(|| "-".to_string(), |ms| ms.to_string()),
        )
    }
}

impl DeliveryStats {
    pub fn new() -> Self {
        let metrics = DeliveryMetrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record a single HTTP attempt
    pub async fn record_attempt(&self, success: bool, duration_ms: u64, status_code: Option<u16>) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_attempts += 1;
        if success {
            metrics.successful_attempts += 1;
        } else {
            metrics.failed_attempts += 1;
        }

        metrics.attempt_durations.push(duration_ms);

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Record the final outcome of one record
    pub async fn record_delivery(&self, success: bool) {
        let mut metrics = self.metrics.lock().await;
        if success {
            metrics.records_submitted += 1;
        } else {
            metrics.records_failed += 1;
        }
    }

    pub async fn record_skipped(&self) {
        self.metrics.lock().await.records_skipped += 1;
    }

    /// Get all metrics
    pub async fn snapshot(&self) -> DeliveryMetrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timer for measuring attempt durations
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts() {
        let stats = DeliveryStats::new();
        stats.record_attempt(false, 10, Some(503)).await;
        stats.record_attempt(true, 30, Some(200)).await;
        stats.record_delivery(true).await;
        stats.record_skipped().await;

        let metrics = stats.snapshot().await;
        assert_eq!(metrics.total_attempts, 2);
        assert_eq!(metrics.failed_attempts, 1);
        assert_eq!(metrics.records_submitted, 1);
        assert_eq!(metrics.records_skipped, 1);
        assert_eq!(metrics.status_codes.get(&503), Some(&1));
        assert_eq!(metrics.average_attempt_ms(), Some(20));
        assert!(metrics.summary().contains("submitted=1"));
    }
}
