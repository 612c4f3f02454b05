use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection lifecycle
///
/// ```text
/// Disconnected ─connect─> Connecting ─> Connected ─[auth]─> Authenticating ─> Ready
///      ^                      ^   │          │                    │            │
///      │                      │   └──────────┴──── failure ───────┴─> Errored  │
///      │                      └──────────── retry delay ──────────────┘        │
///      └──────────────── Disconnecting <──── disconnect / fatal I/O ───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    /// Transport (TCP and TLS) is up
    Connected = 2,
    /// Waiting for the server's auth verdict
    Authenticating = 3,
    /// Session established, the queue is being drained
    Ready = 4,
    Disconnecting = 5,
    /// Last connect attempt failed, a retry may follow
    Errored = 6,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Authenticating,
            4 => ConnectionState::Ready,
            5 => ConnectionState::Disconnecting,
            6 => ConnectionState::Errored,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Somewhere between a connect request and `Ready`
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Authenticating
                | ConnectionState::Errored
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free mirror of the client's state
///
/// The authoritative state lives under the client's state mutex; every
/// transition also stores here so `is_connected()` never takes the lock.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Ready
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
