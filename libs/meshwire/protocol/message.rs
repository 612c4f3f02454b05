use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest accepted priority
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority
pub const MAX_PRIORITY: u8 = 10;
/// Priority used when the caller does not pick one
pub const DEFAULT_PRIORITY: u8 = 5;

/// Current wall-clock time in milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Severity carried by an [`Payload::ErrorReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Typed payload; the variant is the message kind
///
/// Serialized adjacently tagged, e.g.
/// `{"kind": "ping", "data": {"timestamp": 1700000000000}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Quantum-like state sample; `energy` must equal `amplitude²`
    StateVector {
        amplitude: f64,
        phase: f64,
        energy: f64,
        coherence: f64,
    },
    /// Normalized activity level of a named metric
    ActivityMetric {
        name: String,
        level: f64,
        sample_count: u64,
    },
    /// Learned pattern weights
    PatternUpdate {
        pattern_id: String,
        confidence: f64,
        weights: Vec<f64>,
    },
    /// Host health summary
    SystemStatus {
        cpu_percent: f64,
        memory_percent: f64,
        uptime_secs: u64,
        healthy: bool,
    },
    /// Application-level error notification
    ErrorReport {
        code: u32,
        message: String,
        severity: Severity,
    },
    /// Liveness probe, answered with a `Pong` carrying the same timestamp
    Ping { timestamp: u64 },
    /// Answer to a `Ping`
    Pong { timestamp: u64 },
    /// Authentication request carrying the auth header
    Auth { header: String },
    /// Server verdict on an `Auth` request
    AuthResult {
        accepted: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Generic acknowledgement
    Ack { timestamp: u64 },
}

/// Discriminant of [`Payload`], used to key validators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    StateVector,
    ActivityMetric,
    PatternUpdate,
    SystemStatus,
    ErrorReport,
    Ping,
    Pong,
    Auth,
    AuthResult,
    Ack,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::StateVector,
        MessageKind::ActivityMetric,
        MessageKind::PatternUpdate,
        MessageKind::SystemStatus,
        MessageKind::ErrorReport,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Auth,
        MessageKind::AuthResult,
        MessageKind::Ack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::StateVector => "state_vector",
            MessageKind::ActivityMetric => "activity_metric",
            MessageKind::PatternUpdate => "pattern_update",
            MessageKind::SystemStatus => "system_status",
            MessageKind::ErrorReport => "error_report",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Auth => "auth",
            MessageKind::AuthResult => "auth_result",
            MessageKind::Ack => "ack",
        }
    }

    /// Kinds the protocol itself uses, as opposed to application data
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageKind::Ping
                | MessageKind::Pong
                | MessageKind::Auth
                | MessageKind::AuthResult
                | MessageKind::Ack
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::StateVector { .. } => MessageKind::StateVector,
            Payload::ActivityMetric { .. } => MessageKind::ActivityMetric,
            Payload::PatternUpdate { .. } => MessageKind::PatternUpdate,
            Payload::SystemStatus { .. } => MessageKind::SystemStatus,
            Payload::ErrorReport { .. } => MessageKind::ErrorReport,
            Payload::Ping { .. } => MessageKind::Ping,
            Payload::Pong { .. } => MessageKind::Pong,
            Payload::Auth { .. } => MessageKind::Auth,
            Payload::AuthResult { .. } => MessageKind::AuthResult,
            Payload::Ack { .. } => MessageKind::Ack,
        }
    }
}

/// Message envelope
///
/// Constructed by the sender, validated before it is queued, and not
/// modified afterwards except by the documented repair step applied to
/// received messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub source_id: String,
    pub target_id: String,
    pub payload: Payload,
}

impl Message {
    /// Create a message stamped with the current time and default priority
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            timestamp: now_millis(),
            priority: DEFAULT_PRIORITY,
            source_id: source_id.into(),
            target_id: target_id.into(),
            payload,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Override the timestamp
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A `Ping` carrying `timestamp` both in the envelope and the payload
    pub fn ping(source_id: impl Into<String>, target_id: impl Into<String>, timestamp: u64) -> Self {
        Self::new(source_id, target_id, Payload::Ping { timestamp }).with_timestamp(timestamp)
    }

    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Build the answer to this message: swaps source and target, keeps priority
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            timestamp: now_millis(),
            priority: self.priority,
            source_id: self.target_id.clone(),
            target_id: self.source_id.clone(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind() {
        let payload = Payload::Pong { timestamp: 7 };
        assert_eq!(payload.kind(), MessageKind::Pong);
        assert!(payload.kind().is_control());
        assert!(!MessageKind::StateVector.is_control());
    }

    #[test]
    fn test_json_shape_is_adjacently_tagged() {
        let msg = Message::ping("client", "server", 42);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["kind"], "ping");
        assert_eq!(json["payload"]["data"]["timestamp"], 42);
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_reply_swaps_endpoints() {
        let msg = Message::ping("a", "b", 1).with_priority(9);
        let reply = msg.reply(Payload::Pong { timestamp: 1 });
        assert_eq!(reply.source_id, "b");
        assert_eq!(reply.target_id, "a");
        assert_eq!(reply.priority, 9);
    }

    #[test]
    fn test_all_kinds_have_distinct_names() {
        let mut names: Vec<_> = MessageKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MessageKind::ALL.len());
    }
}
