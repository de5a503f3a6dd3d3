use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;

/// In-memory counter/gauge/histogram registry (C11). No callback fan-out:
/// publish is pull-based via [`Metrics::snapshot`], matching spec §4.11.
pub struct Metrics {
    counters: DashMap<String, AtomicI64>,
    gauges: DashMap<String, AtomicI64>,
    histograms: DashMap<String, Mutex<Vec<f64>>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    pub fn incr(&self, name: &str, by: i64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(by, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn observe(&self, name: &str, value: f64) {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .expect("histogram mutex poisoned")
            .push(value);
    }

    /// Snapshot every primitive to a JSON-serializable structure and reset
    /// nothing — the run-end flush calls this once, then writes it out.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let histograms = self
            .histograms
            .iter()
            .map(|e| {
                let values = e.value().lock().expect("histogram mutex poisoned").clone();
                (e.key().clone(), HistogramSummary::from_values(&values))
            })
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct HistogramSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / count as f64;
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Self {
            count,
            mean,
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, i64>,
    pub gauges: HashMap<String, i64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

/// Derives a 0-100 health score from success ratio, mean validation
/// quality, and open-circuit count (§4.11).
pub fn health_score(success_ratio: f64, mean_quality: f64, open_circuits: u64) -> f64 {
    let base = 100.0 * (0.6 * success_ratio.clamp(0.0, 1.0) + 0.4 * mean_quality.clamp(0.0, 1.0));
    let penalty = (open_circuits as f64) * 15.0;
    (base - penalty).clamp(0.0, 100.0)
}
