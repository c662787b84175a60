//! Metrics sink: named counters and duration histograms
//!
//! One explicitly constructed [`MetricsSink`] is shared (via `Arc`) by the
//! loaders and the precomputation engine. Writes are append-only; reads go
//! through [`MetricsSink::snapshot`], which copies into immutable maps.
//!
//! Keys carry their labels inline, sorted by label name:
//! `cache_hits{dataset=transfers}`.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Running duration summary (no percentile buckets)
#[derive(Debug, Clone, Copy)]
struct Histogram {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    const fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: 0.0,
        }
    }

    fn record(&mut self, seconds: f64) {
        self.count += 1;
        self.sum += seconds;
        self.min = self.min.min(seconds);
        self.max = self.max.max(seconds);
    }
}

/// Immutable view of one histogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// Number of observations
    pub count: u64,
    /// Sum of observed seconds
    pub sum: f64,
    /// Smallest observation (0 when empty)
    pub min: f64,
    /// Largest observation
    pub max: f64,
    /// Mean observation (0 when empty)
    pub avg: f64,
}

impl From<Histogram> for HistogramSnapshot {
    #[allow(clippy::cast_precision_loss)]
    fn from(h: Histogram) -> Self {
        Self {
            count: h.count,
            sum: h.sum,
            min: if h.count == 0 { 0.0 } else { h.min },
            max: h.max,
            avg: if h.count == 0 { 0.0 } else { h.sum / h.count as f64 },
        }
    }
}

/// Point-in-time copy of every counter and histogram
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Counter values keyed by `name{labels}`
    pub counters: BTreeMap<String, u64>,
    /// Histogram summaries keyed by `name{labels}`
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl MetricsSnapshot {
    /// Counter value, 0 if never incremented
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&metric_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Histogram summary, if any observation was recorded
    #[must_use]
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        self.histograms.get(&metric_key(name, labels)).copied()
    }
}

/// Thread-safe metrics accumulator
#[derive(Debug, Default)]
pub struct MetricsSink {
    counters: DashMap<String, u64>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.add(name, labels, 1);
    }

    /// Increment a counter by `value`
    pub fn add(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        *self.counters.entry(metric_key(name, labels)).or_insert(0) += value;
    }

    /// Record one duration observation
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], duration: Duration) {
        self.histograms
            .entry(metric_key(name, labels))
            .or_insert_with(Histogram::new)
            .record(duration.as_secs_f64());
    }

    /// Start a timer that records into `name` when dropped
    #[must_use]
    pub fn timer<'a>(&'a self, name: &str, labels: &[(&str, &str)]) -> TimerGuard<'a> {
        TimerGuard {
            sink: self,
            key: metric_key(name, labels),
            started: Instant::now(),
        }
    }

    /// Copy every metric into an immutable snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), HistogramSnapshot::from(*e.value())))
                .collect(),
        }
    }
}

/// Records elapsed time into its histogram on drop
#[derive(Debug)]
pub struct TimerGuard<'a> {
    sink: &'a MetricsSink,
    key: String,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        let seconds = self.started.elapsed().as_secs_f64();
        self.sink
            .histograms
            .entry(std::mem::take(&mut self.key))
            .or_insert_with(Histogram::new)
            .record(seconds);
    }
}

/// Encode a metric name and its labels as `name{k=v,...}` with sorted labels
#[must_use]
pub fn metric_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let body: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", body.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metric_key_sorts_labels() {
        assert_eq!(metric_key("hits", &[]), "hits");
        assert_eq!(
            metric_key("hits", &[("layer", "disk"), ("dataset", "bases")]),
            "hits{dataset=bases,layer=disk}"
        );
    }

    #[test]
    fn test_counters_accumulate() {
        let sink = MetricsSink::new();
        sink.increment("cache_hits", &[("dataset", "transfers")]);
        sink.increment("cache_hits", &[("dataset", "transfers")]);
        sink.add("rows_dropped", &[], 5);

        let snap = sink.snapshot();
        assert_eq!(snap.counter("cache_hits", &[("dataset", "transfers")]), 2);
        assert_eq!(snap.counter("rows_dropped", &[]), 5);
        assert_eq!(snap.counter("never", &[]), 0);
    }

    #[test]
    fn test_histogram_summary() {
        let sink = MetricsSink::new();
        sink.observe("load", &[], Duration::from_millis(100));
        sink.observe("load", &[], Duration::from_millis(300));

        let h = sink.snapshot().histogram("load", &[]).unwrap();
        assert_eq!(h.count, 2);
        assert!((h.sum - 0.4).abs() < 1e-9);
        assert!((h.min - 0.1).abs() < 1e-9);
        assert!((h.max - 0.3).abs() < 1e-9);
        assert!((h.avg - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let sink = MetricsSink::new();
        {
            let _t = sink.timer("precompute_seconds", &[]);
        }
        assert_eq!(sink.snapshot().histogram("precompute_seconds", &[]).unwrap().count, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let sink = MetricsSink::new();
        sink.increment("a", &[]);
        let snap = sink.snapshot();
        sink.increment("a", &[]);
        assert_eq!(snap.counter("a", &[]), 1);
        assert_eq!(sink.snapshot().counter("a", &[]), 2);
    }

    #[test]
    fn test_concurrent_increments() {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        sink.increment("n", &[]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.snapshot().counter("n", &[]), 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let sink = MetricsSink::new();
        sink.increment("x", &[]);
        let json = serde_json::to_string(&sink.snapshot()).unwrap();
        assert!(json.contains("\"counters\""));
        assert!(json.contains("\"histograms\""));
    }
}
