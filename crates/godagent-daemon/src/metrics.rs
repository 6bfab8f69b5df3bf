//! Daemon-wide performance metrics, backing `health.status`.
//!
//! Tracks request latencies and uptime across every method, independent of
//! the per-service counters in [`crate::registry`] -- this is the aggregate
//! view, the registry's are the per-method breakdown.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Daemon-wide performance metrics tracker.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    inner: Arc<Mutex<MetricsInner>>,
    started_at: Instant,
}

#[derive(Debug)]
struct MetricsInner {
    /// Request latency samples (in milliseconds), most recent `max_samples` kept.
    request_latencies: Vec<u64>,
    /// Maximum number of latency samples to keep.
    max_samples: usize,
    /// Peak memory usage in bytes.
    peak_memory_bytes: u64,
    /// Total number of requests handled.
    total_requests: u64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(1000) // Keep last 1000 samples
    }
}

impl PerformanceMetrics {
    /// Create a new performance metrics tracker.
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsInner {
                request_latencies: Vec::with_capacity(max_samples),
                max_samples,
                peak_memory_bytes: 0,
                total_requests: 0,
            })),
            started_at: Instant::now(),
        }
    }

    /// Record one handled request's latency.
    pub fn record_request_latency(&self, duration: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = duration.as_millis().min(u128::from(u64::MAX)) as u64;

        if let Ok(mut inner) = self.inner.lock() {
            inner.total_requests += 1;
            if inner.request_latencies.len() >= inner.max_samples {
                inner.request_latencies.remove(0);
            }
            inner.request_latencies.push(latency_ms);
        }
    }

    /// Update peak memory usage.
    pub fn update_memory_usage(&self, current_bytes: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if current_bytes > inner.peak_memory_bytes {
                inner.peak_memory_bytes = current_bytes;
            }
        }
    }

    /// Request latency percentile (e.g. 0.5 for P50, 0.95 for P95).
    pub fn get_latency_percentile(&self, percentile: f64) -> f64 {
        let Ok(inner) = self.inner.lock() else {
            return 0.0;
        };

        if inner.request_latencies.is_empty() {
            return 0.0;
        }

        let mut sorted = inner.request_latencies.clone();
        sorted.sort_unstable();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((sorted.len() as f64 - 1.0) * percentile).round() as usize;
        let index = index.min(sorted.len() - 1);

        #[allow(clippy::cast_precision_loss)]
        let latency = sorted[index] as f64;
        latency
    }

    /// Peak memory usage in bytes.
    pub fn get_peak_memory_bytes(&self) -> u64 {
        self.inner.lock().map(|inner| inner.peak_memory_bytes).unwrap_or(0)
    }

    /// Total number of requests handled since startup.
    pub fn get_total_requests(&self) -> u64 {
        self.inner.lock().map(|inner| inner.total_requests).unwrap_or(0)
    }

    /// Seconds since this tracker (and therefore the daemon) started.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
