//! Named metrics and the text exposition format
//!
//! ```text
//! # HELP meshwire_messages_sent_total Messages written to the wire
//! # TYPE meshwire_messages_sent_total counter
//! meshwire_messages_sent_total 42
//! # HELP meshwire_send_latency_seconds Write-to-response latency
//! # TYPE meshwire_send_latency_seconds histogram
//! meshwire_send_latency_seconds_bucket{le="0.005"} 30
//! meshwire_send_latency_seconds_bucket{le="+Inf"} 42
//! meshwire_send_latency_seconds_sum 0.173
//! meshwire_send_latency_seconds_count 42
//! ```
//!
//! Counters and gauges are single atomics. A histogram keeps its sum,
//! count and buckets under one lock so a scrape never sees them disagree.

use crate::error::{MeshError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Latency buckets in seconds, 1ms to 10s
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    #[inline]
    pub fn inc(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Settable signed value
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec(&self, n: i64) {
        self.value.fetch_sub(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct HistogramState {
    /// One slot per bound plus the overflow bucket
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Consistent copy of a histogram's state
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    /// Non-cumulative; the last entry is the overflow bucket
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    fn new(bounds: Vec<f64>) -> Self {
        let slots = bounds.len() + 1;
        Self {
            bounds,
            state: Mutex::new(HistogramState {
                counts: vec![0; slots],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Record one observation in the first bucket whose bound is `>= value`
    ///
    /// NaN compares false against every bound and lands in the overflow
    /// bucket. It is counted but kept out of `sum`.
    pub fn observe(&self, value: f64) {
        let slot = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());

        let mut state = self.state.lock();
        state.counts[slot] += 1;
        if !value.is_nan() {
            state.sum += value;
        }
        state.count += 1;
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: state.counts.clone(),
            sum: state.sum,
            count: state.count,
        }
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }
}

#[derive(Debug, Clone)]
enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Metric {
    fn type_name(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::Histogram(_) => "histogram",
        }
    }
}

#[derive(Debug)]
struct Entry {
    help: String,
    metric: Metric,
}

/// Name-keyed collection of metrics
///
/// Registration takes the write lock; updates go straight to the returned
/// handles and never touch the registry.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: RwLock<BTreeMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Result<Arc<Counter>> {
        let counter = Arc::new(Counter::default());
        self.insert(name, help, Metric::Counter(Arc::clone(&counter)))?;
        Ok(counter)
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<Arc<Gauge>> {
        let gauge = Arc::new(Gauge::default());
        self.insert(name, help, Metric::Gauge(Arc::clone(&gauge)))?;
        Ok(gauge)
    }

    /// Register a histogram with strictly ascending, finite bucket bounds
    pub fn register_histogram(&self, name: &str, help: &str, buckets: &[f64]) -> Result<Arc<Histogram>> {
        if buckets.iter().any(|b| !b.is_finite()) {
            return Err(MeshError::InvalidMetric(format!(
                "{}: bucket bounds must be finite",
                name
            )));
        }
        if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(MeshError::InvalidMetric(format!(
                "{}: bucket bounds must be strictly ascending",
                name
            )));
        }
        let histogram = Arc::new(Histogram::new(buckets.to_vec()));
        self.insert(name, help, Metric::Histogram(Arc::clone(&histogram)))?;
        Ok(histogram)
    }

    fn insert(&self, name: &str, help: &str, metric: Metric) -> Result<()> {
        validate_name(name)?;
        let mut metrics = self.metrics.write();
        if metrics.contains_key(name) {
            return Err(MeshError::MetricAlreadyRegistered(name.to_string()));
        }
        metrics.insert(
            name.to_string(),
            Entry {
                help: help.to_string(),
                metric,
            },
        );
        Ok(())
    }

    pub fn counter(&self, name: &str) -> Option<Arc<Counter>> {
        match self.metrics.read().get(name).map(|e| &e.metric) {
            Some(Metric::Counter(counter)) => Some(Arc::clone(counter)),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<Arc<Gauge>> {
        match self.metrics.read().get(name).map(|e| &e.metric) {
            Some(Metric::Gauge(gauge)) => Some(Arc::clone(gauge)),
            _ => None,
        }
    }

    pub fn histogram(&self, name: &str) -> Option<Arc<Histogram>> {
        match self.metrics.read().get(name).map(|e| &e.metric) {
            Some(Metric::Histogram(histogram)) => Some(Arc::clone(histogram)),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Render every metric in the text exposition format, sorted by name
    pub fn export(&self) -> String {
        let metrics = self.metrics.read();
        let mut out = String::with_capacity(metrics.len() * 128);

        for (name, entry) in metrics.iter() {
            let _ = writeln!(out, "# HELP {} {}", name, escape_help(&entry.help));
            let _ = writeln!(out, "# TYPE {} {}", name, entry.metric.type_name());

            match entry.metric {
                Metric::Counter(ref counter) => {
                    let _ = writeln!(out, "{} {}", name, counter.get());
                }
                Metric::Gauge(ref gauge) => {
                    let _ = writeln!(out, "{} {}", name, gauge.get());
                }
                Metric::Histogram(ref histogram) => {
                    let snapshot = histogram.snapshot();
                    let mut cumulative = 0u64;
                    for (bound, count) in snapshot.bounds.iter().zip(&snapshot.counts) {
                        cumulative += count;
                        let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, cumulative);
                    }
                    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, snapshot.count);
                    let _ = writeln!(out, "{}_sum {}", name, snapshot.sum);
                    let _ = writeln!(out, "{}_count {}", name, snapshot.count);
                }
            }
        }
        out
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MeshError::InvalidMetric(format!("invalid metric name '{}'", name)))
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = Registry::new();
        registry.register_counter("requests_total", "Requests").unwrap();
        let err = registry.register_gauge("requests_total", "Again").unwrap_err();
        assert_eq!(err, MeshError::MetricAlreadyRegistered("requests_total".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_names() {
        let registry = Registry::new();
        for name in ["", "9lives", "has-dash", "with space"] {
            assert!(matches!(
                registry.register_counter(name, "x"),
                Err(MeshError::InvalidMetric(_))
            ));
        }
        registry.register_counter("ns:sub_total", "ok").unwrap();
    }

    #[test]
    fn test_buckets_must_ascend() {
        let registry = Registry::new();
        assert!(registry.register_histogram("h1", "x", &[1.0, 1.0]).is_err());
        assert!(registry.register_histogram("h2", "x", &[2.0, 1.0]).is_err());
        assert!(registry.register_histogram("h3", "x", &[1.0, f64::INFINITY]).is_err());
        assert!(registry.register_histogram("h4", "x", &[]).is_ok());
    }

    #[test]
    fn test_counter_and_gauge() {
        let registry = Registry::new();
        let counter = registry.register_counter("c_total", "c").unwrap();
        counter.inc(2);
        counter.inc(3);
        assert_eq!(counter.get(), 5);
        assert_eq!(registry.counter("c_total").unwrap().get(), 5);

        let gauge = registry.register_gauge("g", "g").unwrap();
        gauge.set(10);
        gauge.inc(5);
        gauge.dec(20);
        assert_eq!(gauge.get(), -5);
        assert!(registry.counter("g").is_none());
    }

    #[test]
    fn test_histogram_bucket_placement() {
        let registry = Registry::new();
        let histogram = registry.register_histogram("lat", "latency", &[1.0, 5.0]).unwrap();
        for v in [0.5, 1.0, 3.0, 5.0, 7.0] {
            histogram.observe(v);
        }
        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.counts, vec![2, 2, 1]);
        assert_eq!(snapshot.count, 5);
        assert_eq!(snapshot.counts.iter().sum::<u64>(), snapshot.count);
        assert!((snapshot.sum - 16.5).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_nan_goes_to_overflow() {
        let registry = Registry::new();
        let histogram = registry.register_histogram("lat", "latency", &[1.0, 5.0]).unwrap();
        histogram.observe(2.0);
        histogram.observe(f64::NAN);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.counts, vec![0, 1, 1]);
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.counts.iter().sum::<u64>(), snapshot.count);
        assert_eq!(snapshot.sum, 2.0);
        assert!(registry.export().contains("lat_bucket{le=\"+Inf\"} 2\n"));
    }

    #[test]
    fn test_export_format() {
        let registry = Registry::new();
        registry.register_counter("b_total", "Line one\nline two").unwrap().inc(7);
        registry.register_gauge("a_depth", "Depth").unwrap().set(-3);
        let histogram = registry.register_histogram("c_seconds", "Latency", &[0.5, 1.0]).unwrap();
        histogram.observe(0.25);
        histogram.observe(0.75);
        histogram.observe(4.0);

        let text = registry.export();
        let expected = "\
# HELP a_depth Depth
# TYPE a_depth gauge
a_depth -3
# HELP b_total Line one\\nline two
# TYPE b_total counter
b_total 7
# HELP c_seconds Latency
# TYPE c_seconds histogram
c_seconds_bucket{le=\"0.5\"} 1
c_seconds_bucket{le=\"1\"} 2
c_seconds_bucket{le=\"+Inf\"} 3
c_seconds_sum 5
c_seconds_count 3
";
        assert_eq!(text, expected);
    }
}
