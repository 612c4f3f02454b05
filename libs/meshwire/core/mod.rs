//! # Client core
//!
//! The synchronous client and everything it is assembled from:
//!
//! - **Client / ClientBuilder**: type-state builder, connect, send, receive
//! - **worker**: the single I/O thread owning the transport
//! - **BoundedQueue**: blocking FIFO between producers and the worker
//! - **RetryPolicy**: exponential backoff with jitter and an overall budget
//! - **AuthManager / Heartbeat**: handshake credential and ping bookkeeping
//! - **ClientConfig**: YAML + environment configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshwire::{Client, Message, Payload};
//!
//! fn main() -> meshwire::Result<()> {
//!     let client = Client::builder()
//!         .address("mesh.internal", 7400)
//!         .auth_token("secret")
//!         .build()?;
//!
//!     client.connect()?;
//!     client.send_with_callback(
//!         Message::new("sensor-12", "hub", Payload::Ack { timestamp: 1 }),
//!         |result| println!("response: {:?}", result),
//!     )?;
//!
//!     while let Some(event) = client.try_recv_event() {
//!         println!("Event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod builder;
pub mod client;
pub mod config;
pub mod connection_state;
pub mod heartbeat;
pub mod queue;
pub mod retry;
pub(crate) mod worker;

// Re-export main types
pub use auth::AuthManager;
pub use builder::{states, ClientBuilder};
pub use client::{Client, ClientEvent};
pub use config::{
    ClientConfig, CompressionAlgorithm, CompressionConfig, ConfigError, RetryConfig, TimeoutConfig,
    TlsConfig, TlsVersion,
};
pub use connection_state::{AtomicConnectionState, ConnectionState};
pub use heartbeat::Heartbeat;
pub use queue::{BoundedQueue, Rejected};
pub use retry::{RetryOutcome, RetryPolicy};

/// Create a new client builder
///
/// Shorthand for [`Client::builder`].
///
/// # Example
/// ```ignore
/// let client = meshwire::builder()
///     .config(ClientConfig::load("config/meshwire.yaml")?)
///     .on_disconnect(|cause| eprintln!("link down: {:?}", cause))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder<states::NoAddress> {
    ClientBuilder::new()
}
