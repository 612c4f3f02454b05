//! # Metrics
//!
//! - **Registry**: named counters, gauges and histograms with text export
//! - **ClientMetrics**: the set a client registers under its prefix
//! - **MetricsExporter**: tokio HTTP endpoint serving the export

pub mod client;
pub mod exporter;
pub mod registry;

pub use client::{ClientMetrics, MetricsSnapshot};
pub use exporter::MetricsExporter;
pub use registry::{Counter, Gauge, Histogram, HistogramSnapshot, Registry, DEFAULT_LATENCY_BUCKETS};
