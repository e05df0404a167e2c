//! Observability: latency histograms and event counters.
//! Histograms keep a fixed window of samples and report p50/p95/p99.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity window of histogram samples.
struct Histogram {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl Histogram {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Stores histograms and counters for all named metrics.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, Histogram>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    window: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            window: 1024,
        }
    }

    /// Record a sample for the named histogram.
    pub fn record(&self, name: &'static str, value: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| Histogram::new(self.window))
            .push(value);
    }

    /// Bump a counter by `by`.
    pub fn increment(&self, name: &'static str, by: u64) {
        *self.counters.lock().entry(name).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Percentile for a histogram (p in 0-100).
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists
            .get(name)
            .map(|h| h.percentile(p))
            .unwrap_or(0.0)
    }

    /// Summary of all histograms at p50/p95/p99.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, h)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50: h.percentile(50.0),
                        p95: h.percentile(95.0),
                        p99: h.percentile(99.0),
                        count: h.count,
                    },
                )
            })
            .collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

/// Well-known metric names.
pub mod metric_names {
    /// Histogram, microseconds a tick fired after its deadline.
    pub const TICK_LAG_US: &str = "pacer_tick_lag_us";
    /// Counter, frames that carried padding.
    pub const UNDERRUN_FRAMES: &str = "pacer_underrun_frames";
    /// Counter, frames sent.
    pub const FRAMES_SENT: &str = "pacer_frames_sent";
    /// Counter, schedule realignments after falling too far behind.
    pub const SCHEDULE_RESETS: &str = "pacer_schedule_resets";
    /// Counter, frames dropped by a full endpoint queue.
    pub const ENDPOINT_DROPPED: &str = "endpoint_frames_dropped";
    pub const TRANSCRIBE_US: &str = "t_transcribe_us";
    pub const SYNTHESIZE_US: &str = "t_synthesize_us";
    pub const REPLY_US: &str = "t_reply_us";
    /// Counter, completions discarded for carrying an old epoch.
    pub const STALE_COMPLETIONS: &str = "stale_completions";
    /// Counter, segments dropped over the queue duration cap.
    pub const QUEUE_OVERFLOW_SEGMENTS: &str = "queue_overflow_segments";
    pub const SYNTH_CACHE_HITS: &str = "synth_cache_hits";
}
