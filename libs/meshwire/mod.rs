//! # meshwire
//!
//! A synchronous client for a framed, length-prefixed messaging protocol
//! between the nodes of a mesh and their hub.
//!
//! ## Features
//!
//! - **Type-state builder**: the server address is enforced at compile time
//! - **Single I/O worker**: one thread owns the socket, producers only touch a bounded queue
//! - **Typed messages**: validated on send, repaired on receive
//! - **Reconnection**: exponential backoff with jitter, interruptible by `disconnect()`
//! - **Transport options**: TLS through `native-tls`, per-frame deflate/gzip/zstd
//! - **Metrics**: counters, gauges and histograms in text exposition format

pub mod traits;
pub mod core;
pub mod metrics;
pub mod protocol;
pub mod transport;

// Re-export all traits
pub use traits::*;

// Re-export core client functionality
pub use self::core::{
    builder,
    builder::{states, ClientBuilder},
    client::{Client, ClientEvent},
    config::{
        ClientConfig, CompressionAlgorithm, CompressionConfig, ConfigError, RetryConfig,
        TimeoutConfig, TlsConfig, TlsVersion,
    },
    connection_state::ConnectionState,
    queue::BoundedQueue,
    retry::RetryPolicy,
};

pub use metrics::{MetricsExporter, MetricsSnapshot, Registry};
pub use protocol::{Message, MessageKind, Payload, Severity, ValidationError, ValidatorRegistry};
