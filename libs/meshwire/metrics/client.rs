//! The metric set every client registers
//!
//! Names are `<prefix>_<metric>`. Clients sharing one registry need
//! distinct prefixes, otherwise the second registration fails with
//! `MetricAlreadyRegistered`.

use super::registry::{Counter, Gauge, Histogram, Registry, DEFAULT_LATENCY_BUCKETS};
use crate::core::connection_state::ConnectionState;
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of a client's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub send_errors: u64,
    pub reconnect_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub heartbeats_sent: u64,
    pub repaired_messages: u64,
    pub queue_depth: i64,
    pub send_latency_count: u64,
    pub send_latency_sum_secs: f64,
    pub connection_state: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct ClientMetrics {
    pub messages_sent: Arc<Counter>,
    pub messages_received: Arc<Counter>,
    pub send_errors: Arc<Counter>,
    pub reconnects: Arc<Counter>,
    pub bytes_sent: Arc<Counter>,
    pub bytes_received: Arc<Counter>,
    pub heartbeats_sent: Arc<Counter>,
    pub repaired_messages: Arc<Counter>,
    pub queue_depth: Arc<Gauge>,
    /// `ConnectionState` discriminant
    pub connection_state: Arc<Gauge>,
    pub send_latency: Arc<Histogram>,
}

impl ClientMetrics {
    pub fn register(registry: &Registry, prefix: &str) -> Result<Self> {
        let name = |metric: &str| {
            if prefix.is_empty() {
                metric.to_string()
            } else {
                format!("{}_{}", prefix, metric)
            }
        };

        Ok(Self {
            messages_sent: registry.register_counter(&name("messages_sent_total"), "Application messages written to the wire")?,
            messages_received: registry
                .register_counter(&name("messages_received_total"), "Response messages accepted")?,
            send_errors: registry.register_counter(&name("send_errors_total"), "Sends that completed with an error")?,
            reconnects: registry.register_counter(&name("reconnects_total"), "Automatic reconnections started")?,
            bytes_sent: registry.register_counter(&name("bytes_sent_total"), "Frame body bytes written")?,
            bytes_received: registry.register_counter(&name("bytes_received_total"), "Frame body bytes read")?,
            heartbeats_sent: registry.register_counter(&name("heartbeats_sent_total"), "Idle pings sent")?,
            repaired_messages: registry
                .register_counter(&name("repaired_messages_total"), "Received messages repaired into range")?,
            queue_depth: registry.register_gauge(&name("queue_depth"), "Messages waiting in the send queue")?,
            connection_state: registry.register_gauge(
                &name("connection_state"),
                "Connection state (0 disconnected, 4 ready, 6 errored)",
            )?,
            send_latency: registry.register_histogram(
                &name("send_latency_seconds"),
                "Time from frame write to response",
                DEFAULT_LATENCY_BUCKETS,
            )?,
        })
    }

    pub fn observe_latency(&self, latency: Duration) {
        self.send_latency.observe(latency.as_secs_f64());
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.connection_state.set(state as i64);
    }

    pub fn snapshot(&self, state: ConnectionState) -> MetricsSnapshot {
        let latency = self.send_latency.snapshot();
        MetricsSnapshot {
            messages_sent: self.messages_sent.get(),
            messages_received: self.messages_received.get(),
            send_errors: self.send_errors.get(),
            reconnect_count: self.reconnects.get(),
            bytes_sent: self.bytes_sent.get(),
            bytes_received: self.bytes_received.get(),
            heartbeats_sent: self.heartbeats_sent.get(),
            repaired_messages: self.repaired_messages.get(),
            queue_depth: self.queue_depth.get(),
            send_latency_count: latency.count,
            send_latency_sum_secs: latency.sum,
            connection_state: state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeshError;

    #[test]
    fn test_prefixed_names() {
        let registry = Registry::new();
        let metrics = ClientMetrics::register(&registry, "edge").unwrap();
        metrics.messages_sent.inc(1);
        assert!(registry.contains("edge_messages_sent_total"));
        assert!(registry.contains("edge_send_latency_seconds"));
        assert_eq!(registry.counter("edge_messages_sent_total").unwrap().get(), 1);
    }

    #[test]
    fn test_same_prefix_twice_fails() {
        let registry = Registry::new();
        ClientMetrics::register(&registry, "edge").unwrap();
        assert!(matches!(
            ClientMetrics::register(&registry, "edge"),
            Err(MeshError::MetricAlreadyRegistered(_))
        ));
        ClientMetrics::register(&registry, "core").unwrap();
    }

    #[test]
    fn test_snapshot_reflects_updates() {
        let registry = Registry::new();
        let metrics = ClientMetrics::register(&registry, "").unwrap();
        metrics.bytes_sent.inc(128);
        metrics.queue_depth.set(3);
        metrics.observe_latency(Duration::from_millis(4));

        let snapshot = metrics.snapshot(ConnectionState::Ready);
        assert_eq!(snapshot.bytes_sent, 128);
        assert_eq!(snapshot.queue_depth, 3);
        assert_eq!(snapshot.send_latency_count, 1);
        assert_eq!(snapshot.connection_state, ConnectionState::Ready);
    }
}
