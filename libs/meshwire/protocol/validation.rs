//! Message validation
//!
//! Validation runs in two stages, always in this order:
//!
//! 1. **Envelope rules**, identical for every kind: timestamp not in the
//!    future, priority in `1..=10`, non-empty source and target ids.
//! 2. **Payload rules**, looked up by [`MessageKind`] in a
//!    [`ValidatorRegistry`]. Kinds without a registered validator pass.
//!
//! The first violated rule is reported.

use super::message::{now_millis, Message, MessageKind, MAX_PRIORITY, MIN_PRIORITY};
use super::rules;
use crate::traits::PayloadValidator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single violated validation rule
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("timestamp {timestamp} is in the future (now {now})")]
    TimestampInFuture { timestamp: u64, now: u64 },

    #[error("priority {0} outside 1..=10")]
    PriorityOutOfRange(u8),

    #[error("source_id is empty")]
    EmptySourceId,

    #[error("target_id is empty")]
    EmptyTargetId,

    #[error("{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} = {actual} inconsistent, expected {expected}")]
    Inconsistent {
        field: &'static str,
        expected: f64,
        actual: f64,
    },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} is empty")]
    EmptyField { field: &'static str },

    #[error("{field} = {value} below minimum {min}")]
    TooSmall {
        field: &'static str,
        value: u64,
        min: u64,
    },
}

impl ValidationError {
    /// Envelope violations cannot be repaired by clamping payload fields
    pub fn is_envelope(&self) -> bool {
        matches!(
            self,
            ValidationError::TimestampInFuture { .. }
                | ValidationError::PriorityOutOfRange(_)
                | ValidationError::EmptySourceId
                | ValidationError::EmptyTargetId
        )
    }
}

/// Check the kind-independent envelope rules
pub fn validate_envelope(message: &Message, now: u64, clock_skew: Duration) -> Result<(), ValidationError> {
    let limit = now.saturating_add(clock_skew.as_millis() as u64);
    if message.timestamp > limit {
        return Err(ValidationError::TimestampInFuture {
            timestamp: message.timestamp,
            now,
        });
    }

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&message.priority) {
        return Err(ValidationError::PriorityOutOfRange(message.priority));
    }

    if message.source_id.is_empty() {
        return Err(ValidationError::EmptySourceId);
    }

    if message.target_id.is_empty() {
        return Err(ValidationError::EmptyTargetId);
    }

    Ok(())
}

/// Per-kind validators plus the envelope clock-skew tolerance
///
/// Built once, then shared read-only (`Arc`) between the sending threads
/// and the I/O worker.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<MessageKind, Arc<dyn PayloadValidator>>,
    clock_skew: Duration,
}

impl ValidatorRegistry {
    /// Registry with no payload rules; only the envelope is checked
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
            clock_skew: Duration::ZERO,
        }
    }

    /// Registry with the built-in rules for every domain kind
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(MessageKind::StateVector, rules::StateVectorRules);
        registry.register(MessageKind::ActivityMetric, rules::ActivityMetricRules);
        registry.register(MessageKind::PatternUpdate, rules::PatternUpdateRules);
        registry.register(MessageKind::SystemStatus, rules::SystemStatusRules);
        registry.register(MessageKind::ErrorReport, rules::ErrorReportRules);
        registry.register(MessageKind::Auth, rules::AuthRules);
        registry
    }

    /// Tolerate timestamps up to `skew` ahead of the local clock
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Register (or replace) the validator for `kind`
    ///
    /// Returns the validator previously registered for that kind.
    pub fn register<V>(&mut self, kind: MessageKind, validator: V) -> Option<Arc<dyn PayloadValidator>>
    where
        V: PayloadValidator + 'static,
    {
        self.validators.insert(kind, Arc::new(validator))
    }

    /// Remove the validator for `kind`; its payloads then pass unchecked
    pub fn unregister(&mut self, kind: MessageKind) -> Option<Arc<dyn PayloadValidator>> {
        self.validators.remove(&kind)
    }

    pub fn has_validator(&self, kind: MessageKind) -> bool {
        self.validators.contains_key(&kind)
    }

    /// Validate envelope, then payload
    pub fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        validate_envelope(message, now_millis(), self.clock_skew)?;
        self.validate_payload(message)
    }

    /// Validate only the payload against its kind's rules
    pub fn validate_payload(&self, message: &Message) -> Result<(), ValidationError> {
        match self.validators.get(&message.kind()) {
            Some(validator) => validator.validate(&message.payload),
            None => Ok(()),
        }
    }

    /// Ask the kind's validator to clamp the payload into range
    ///
    /// Returns `true` if the payload was modified. Callers re-validate.
    pub fn repair(&self, message: &mut Message) -> bool {
        match self.validators.get(&message.kind()) {
            Some(validator) => validator.repair(&mut message.payload),
            None => false,
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.validators.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ValidatorRegistry")
            .field("kinds", &kinds)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Payload, Severity};
    use crate::traits::AcceptAll;

    fn state_vector(amplitude: f64) -> Message {
        Message::new(
            "sensor-1",
            "hub",
            Payload::StateVector {
                amplitude,
                phase: 1.0,
                energy: amplitude * amplitude,
                coherence: 0.5,
            },
        )
    }

    #[test]
    fn test_valid_message_passes() {
        let registry = ValidatorRegistry::standard();
        assert!(registry.validate(&state_vector(0.8)).is_ok());
    }

    #[test]
    fn test_priority_zero_rejected() {
        let registry = ValidatorRegistry::standard();
        let msg = state_vector(0.8).with_priority(0);
        assert_eq!(registry.validate(&msg), Err(ValidationError::PriorityOutOfRange(0)));

        let msg = state_vector(0.8).with_priority(11);
        assert_eq!(registry.validate(&msg), Err(ValidationError::PriorityOutOfRange(11)));
    }

    #[test]
    fn test_amplitude_out_of_range_reported() {
        let registry = ValidatorRegistry::standard();
        let err = registry.validate(&state_vector(1.5)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "amplitude",
                value: 1.5,
                min: 0.0,
                max: 1.0,
            }
        );
    }

    #[test]
    fn test_envelope_checked_before_payload() {
        let registry = ValidatorRegistry::standard();
        let mut msg = state_vector(1.5);
        msg.source_id.clear();
        assert_eq!(registry.validate(&msg), Err(ValidationError::EmptySourceId));

        let mut msg = state_vector(0.5);
        msg.target_id.clear();
        assert_eq!(registry.validate(&msg), Err(ValidationError::EmptyTargetId));
    }

    #[test]
    fn test_future_timestamp_rejected_unless_within_skew() {
        let future = now_millis() + 60_000;
        let msg = state_vector(0.5).with_timestamp(future);

        let strict = ValidatorRegistry::standard();
        assert!(matches!(
            strict.validate(&msg),
            Err(ValidationError::TimestampInFuture { .. })
        ));

        let lenient = ValidatorRegistry::standard().with_clock_skew(Duration::from_secs(120));
        assert!(lenient.validate(&msg).is_ok());
    }

    #[test]
    fn test_unregistered_kind_only_checks_envelope() {
        let mut registry = ValidatorRegistry::standard();
        registry.unregister(MessageKind::StateVector);
        assert!(registry.validate(&state_vector(3.0)).is_ok());
        assert!(!registry.has_validator(MessageKind::StateVector));
    }

    #[test]
    fn test_register_replaces_rules() {
        let mut registry = ValidatorRegistry::standard();
        let msg = Message::new(
            "a",
            "b",
            Payload::ErrorReport {
                code: 1,
                message: String::new(),
                severity: Severity::Warning,
            },
        );
        assert!(registry.validate(&msg).is_err());

        let previous = registry.register(MessageKind::ErrorReport, AcceptAll);
        assert!(previous.is_some());
        assert!(registry.validate(&msg).is_ok());
    }
}
