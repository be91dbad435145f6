//! Rolling latency and hit-rate metrics for the memoizer.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of latency samples kept.
pub const DEFAULT_METRICS_WINDOW: usize = 1_000;

/// The store operation a latency sample was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOp {
    /// A lookup.
    Get,
    /// A write.
    Set,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    op: CacheOp,
    latency: Duration,
}

/// Latency statistics over the current window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Number of samples.
    pub count: usize,
    /// Mean latency.
    pub mean_ms: f64,
    /// Median latency.
    pub p50_ms: f64,
    /// 95th percentile latency.
    pub p95_ms: f64,
    /// Slowest sample.
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_samples(mut latencies: Vec<f64>) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        latencies.sort_by(f64::total_cmp);
        let count = latencies.len();
        let sum: f64 = latencies.iter().sum();

        Self {
            count,
            mean_ms: sum / count as f64,
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
            max_ms: latencies[count - 1],
        }
    }
}

/// Nearest-rank percentile of sorted, non-empty samples.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Cache counters plus a bounded window of recent get/set latencies.
#[derive(Debug)]
pub struct CacheMetrics {
    window: usize,
    samples: Mutex<VecDeque<Sample>>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_WINDOW)
    }
}

impl CacheMetrics {
    /// Creates metrics keeping the last `window` samples (at least one).
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn push(&self, op: CacheOp, latency: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(Sample { op, latency });
    }

    /// Records a lookup and whether it hit.
    pub fn record_get(&self, latency: Duration, hit: bool) {
        self.push(CacheOp::Get, latency);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a write.
    pub fn record_set(&self, latency: Duration) {
        self.push(CacheOp::Set, latency);
    }

    /// Records a backend or serialization error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Summarizes every sample in the window.
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        self.summarize(|_| true)
    }

    /// Summarizes the samples for one operation.
    #[must_use]
    pub fn summary_for(&self, op: CacheOp) -> LatencySummary {
        self.summarize(|sample| sample.op == op)
    }

    fn summarize(&self, keep: impl Fn(&Sample) -> bool) -> LatencySummary {
        let latencies = self
            .samples
            .lock()
            .iter()
            .filter(|&sample| keep(sample))
            .map(|sample| sample.latency.as_secs_f64() * 1_000.0)
            .collect();
        LatencySummary::from_samples(latencies)
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "hits": self.hits(),
            "misses": self.misses(),
            "errors": self.errors(),
            "hit_rate_percent": (self.hit_rate() * 100.0).round() / 100.0,
            "window": self.window,
            "latency": self.summary(),
            "get": self.summary_for(CacheOp::Get),
            "set": self.summary_for(CacheOp::Set),
        })
    }
}
