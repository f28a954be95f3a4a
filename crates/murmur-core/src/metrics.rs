//! In-process metrics: counters, gauges, and latency histograms.
//!
//! Purely in-memory; the snapshot accessor is the only read surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Monotonically increasing counter.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge; can move in either direction.
struct Gauge {
    // f64 bits in an atomic so updates need no lock.
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// Histogram storing raw observations for percentile computation.
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
        }
    }

    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        HistogramSummary {
            count: count as u64,
            sum,
            p50: obs[count / 2],
            p95: obs[((count as f64 * 0.95) as usize).min(count - 1)],
            p99: obs[((count as f64 * 0.99) as usize).min(count - 1)],
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time view of every metric.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

/// Thread-safe metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide recorder used by the client components.
    pub fn global() -> Arc<MetricsRecorder> {
        static GLOBAL: OnceLock<Arc<MetricsRecorder>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(MetricsRecorder::new()))
            .clone()
    }

    pub fn increment(&self, name: &str, n: u64) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(name) {
                counter.increment(n);
                return;
            }
        }
        let mut counters = self.counters.write();
        counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .increment(n);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        {
            let gauges = self.gauges.read();
            if let Some(gauge) = gauges.get(name) {
                gauge.set(value);
                return;
            }
        }
        let mut gauges = self.gauges.write();
        gauges
            .entry(name.to_string())
            .or_insert_with(Gauge::new)
            .set(value);
    }

    pub fn observe(&self, name: &str, value: f64) {
        {
            let histograms = self.histograms.read();
            if let Some(histogram) = histograms.get(name) {
                histogram.observe(value);
                return;
            }
        }
        let mut histograms = self.histograms.write();
        histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .observe(value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).map(Counter::get).unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.read().get(name).map(Gauge::get).unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.summary()))
                .collect(),
        }
    }
}

/// Bump a counter on the global recorder.
pub fn count(name: &str) {
    MetricsRecorder::global().increment(name, 1);
}

/// Add to a counter on the global recorder.
pub fn count_n(name: &str, n: u64) {
    MetricsRecorder::global().increment(name, n);
}

/// Record a duration (in milliseconds) on the global recorder.
pub fn observe_ms(name: &str, millis: f64) {
    MetricsRecorder::global().observe(name, millis);
}
