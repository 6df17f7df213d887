//! Rolling performance metrics for the classification façade.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Default number of latency samples kept per path.
pub const DEFAULT_SAMPLE_WINDOW: usize = 100;

/// Counters and bounded latency windows.
///
/// Counts are per `classify` call, not per remote attempt.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    window: usize,
    remote_successes: u64,
    remote_failures: u64,
    fallback_count: u64,
    cache_hits: u64,
    remote_latencies: VecDeque<Duration>,
    fallback_latencies: VecDeque<Duration>,
}

/// Point-in-time view of [`PerformanceMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub remote_successes: u64,
    pub remote_failures: u64,
    /// `None` until the remote path has been tried.
    pub success_rate: Option<f64>,
    pub average_remote_latency: Option<Duration>,
    pub average_fallback_latency: Option<Duration>,
    pub fallback_count: u64,
    pub cache_hits: u64,
    pub remote_samples: usize,
    pub fallback_samples: usize,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl PerformanceMetrics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            remote_successes: 0,
            remote_failures: 0,
            fallback_count: 0,
            cache_hits: 0,
            remote_latencies: VecDeque::with_capacity(window),
            fallback_latencies: VecDeque::with_capacity(window),
        }
    }

    pub fn record_remote_success(&mut self, latency: Duration) {
        self.remote_successes += 1;
        push_sample(&mut self.remote_latencies, latency, self.window);
    }

    pub fn record_remote_failure(&mut self) {
        self.remote_failures += 1;
    }

    pub fn record_fallback(&mut self, latency: Duration) {
        self.fallback_count += 1;
        push_sample(&mut self.fallback_latencies, latency, self.window);
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let attempts = self.remote_successes + self.remote_failures;
        MetricsSnapshot {
            remote_successes: self.remote_successes,
            remote_failures: self.remote_failures,
            success_rate: (attempts > 0).then(|| self.remote_successes as f64 / attempts as f64),
            average_remote_latency: average(&self.remote_latencies),
            average_fallback_latency: average(&self.fallback_latencies),
            fallback_count: self.fallback_count,
            cache_hits: self.cache_hits,
            remote_samples: self.remote_latencies.len(),
            fallback_samples: self.fallback_latencies.len(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}

fn push_sample(samples: &mut VecDeque<Duration>, sample: Duration, window: usize) {
    samples.push_back(sample);
    while samples.len() > window {
        samples.pop_front();
    }
}

fn average(samples: &VecDeque<Duration>) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total / samples.len() as u32)
}
