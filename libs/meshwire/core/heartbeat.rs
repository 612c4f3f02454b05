//! Idle keep-alive
//!
//! # Architecture
//!
//! The I/O worker owns the heartbeat and consults it between queue polls:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  I/O worker loop             │
//! │                              │
//! │  dequeue (bounded poll) ─────┼──> message written ──> touch()
//! │        │ timeout             │
//! │        v                     │
//! │  due()? ── yes ──> Ping ─────┼──> wire ──> Pong ──> check_pong()
//! └──────────────────────────────┘
//! ```
//!
//! Any traffic resets the idle timer, so a busy connection never pings.
//! A missing or mismatched `Pong` is an I/O failure like any other and
//! triggers the normal reconnect path.

use crate::error::{MeshError, Result};
use crate::protocol::{now_millis, Message, Payload};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct Heartbeat {
    interval: Duration,
    last_activity: Instant,
    /// Timestamp carried by the outstanding ping
    pending: Option<u64>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_activity: Instant::now(),
            pending: None,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record traffic on the connection
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The connection has been idle for a full interval
    pub fn due(&self) -> bool {
        self.last_activity.elapsed() >= self.interval
    }

    /// Time left until the next ping would be due
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.last_activity.elapsed())
    }

    /// Build the next ping and remember its timestamp
    pub fn next_ping(&mut self, source_id: &str, target_id: &str) -> Message {
        let timestamp = now_millis();
        self.pending = Some(timestamp);
        Message::ping(source_id, target_id, timestamp)
    }

    /// Match a response against the outstanding ping, returning the round trip
    pub fn check_pong(&mut self, response: &Message) -> Result<Duration> {
        let expected = self.pending.take().ok_or_else(|| {
            MeshError::ProtocolError("pong received without an outstanding ping".into())
        })?;

        match response.payload {
            Payload::Pong { timestamp } if timestamp == expected => {
                self.touch();
                let rtt = Duration::from_millis(now_millis().saturating_sub(expected));
                debug!("Heartbeat pong received (rtt: {:?})", rtt);
                Ok(rtt)
            }
            Payload::Pong { timestamp } => Err(MeshError::ProtocolError(format!(
                "pong timestamp {} does not match ping {}",
                timestamp, expected
            ))),
            ref other => Err(MeshError::ProtocolError(format!(
                "expected pong, got {}",
                other.kind()
            ))),
        }
    }

    /// Forget any outstanding ping and restart the idle timer
    pub fn reset(&mut self) {
        self.pending = None;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_due_after_interval() {
        let mut heartbeat = Heartbeat::new(Duration::from_millis(20));
        assert!(!heartbeat.due());
        thread::sleep(Duration::from_millis(30));
        assert!(heartbeat.due());
        heartbeat.touch();
        assert!(!heartbeat.due());
    }

    #[test]
    fn test_matching_pong() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        let ping = heartbeat.next_ping("client", "server");
        let Payload::Ping { timestamp } = ping.payload else {
            panic!("expected ping");
        };
        let pong = ping.reply(Payload::Pong { timestamp });
        assert!(heartbeat.check_pong(&pong).is_ok());
    }

    #[test]
    fn test_mismatched_pong() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        let ping = heartbeat.next_ping("client", "server");
        let pong = ping.reply(Payload::Pong { timestamp: 1 });
        assert!(matches!(heartbeat.check_pong(&pong), Err(MeshError::ProtocolError(_))));
    }

    #[test]
    fn test_pong_without_ping() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        let pong = Message::new("server", "client", Payload::Pong { timestamp: 5 });
        assert!(heartbeat.check_pong(&pong).is_err());
    }
}
