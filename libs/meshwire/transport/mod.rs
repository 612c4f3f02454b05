//! # Transport
//!
//! Everything between a connected socket and a frame body:
//!
//! ```text
//! TcpStream ──> [native-tls] ──> TransportStream ──> CompressionStream / DecompressionStream
//! ```
//!
//! Layers are built in that order and torn down in reverse.

pub mod compression;
pub mod stream;
pub mod tls;

pub use compression::{CompressionStream, DecompressionStream};
pub use stream::{connect_tcp, TransportStream};
