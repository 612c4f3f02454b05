//! Per-kind payload validation
//!
//! The envelope rules (timestamp, priority, source and target ids) are
//! fixed and generic. Everything a payload kind means lives behind this
//! trait so applications can register their own rules per `MessageKind`
//! without touching the transport.

use crate::protocol::{Payload, ValidationError};

/// Validation and repair rules for one payload kind
///
/// # Example
///
/// ```ignore
/// struct NonEmptyReport;
///
/// impl PayloadValidator for NonEmptyReport {
///     fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
///         match payload {
///             Payload::ErrorReport { message, .. } if message.is_empty() => {
///                 Err(ValidationError::EmptyField { field: "message" })
///             }
///             _ => Ok(()),
///         }
///     }
/// }
///
/// registry.register(MessageKind::ErrorReport, NonEmptyReport);
/// ```
pub trait PayloadValidator: Send + Sync {
    /// Check the payload, returning the first violated rule
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError>;

    /// Clamp offending fields into their valid range
    ///
    /// Returns `true` if anything could be repaired. The caller always
    /// re-validates afterwards, so a repair that leaves the payload invalid
    /// is treated as a failure. The default repairs nothing.
    fn repair(&self, _payload: &mut Payload) -> bool {
        false
    }
}

/// Validator that accepts every payload of its kind
pub struct AcceptAll;

impl PayloadValidator for AcceptAll {
    fn validate(&self, _payload: &Payload) -> Result<(), ValidationError> {
        Ok(())
    }
}
