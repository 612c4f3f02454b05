//! # meshwire traits
//!
//! Core traits and types shared across the client:
//!
//! - **MeshError**: the error taxonomy and its retry classification
//! - **TokenRefresher**: exchange a refresh token for a new credential
//! - **PayloadValidator**: pluggable per-kind validation and repair
//! - **Callbacks**: typed lifecycle and per-send closures

pub mod auth;
pub mod error;
pub mod handler;
pub mod validator;

// Re-export commonly used types
pub use auth::{AuthCredential, NoRefresh, TokenRefresher};
pub use error::{MeshError, Result};
pub use handler::{Callbacks, ConnectCallback, DisconnectCallback, ErrorCallback, SendCallback};
pub use validator::{AcceptAll, PayloadValidator};
