//! # Message protocol
//!
//! Typed envelope, per-kind validation, wire framing and the repair
//! procedure for received messages.

pub mod codec;
pub mod message;
pub mod recovery;
pub mod rules;
pub mod validation;

pub use codec::{
    decode_message, encode_message, read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
pub use message::{now_millis, Message, MessageKind, Payload, Severity, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use recovery::{MessageRecovery, RecoveryAction, RecoveryLogEntry, RecoveryState, RecoveryStatus};
pub use validation::{validate_envelope, ValidationError, ValidatorRegistry};
