//! Built-in payload rules for the domain kinds
//!
//! Each rule set checks finiteness first, then ranges, then cross-field
//! consistency. Repair clamps fields into range (a dependent field such as
//! `energy` is moved back onto its consistent value); non-finite values and
//! empty strings cannot be repaired.

use super::message::Payload;
use super::validation::ValidationError;
use crate::traits::PayloadValidator;
use std::f64::consts::TAU;

/// Tolerance for `energy == amplitude²`
pub const ENERGY_EPSILON: f64 = 1e-6;

fn check_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NotFinite { field })
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::EmptyField { field })
    } else {
        Ok(())
    }
}

/// Clamp in place, returning whether the value changed
fn clamp_into(value: &mut f64, min: f64, max: f64) -> bool {
    let clamped = value.clamp(min, max);
    let changed = clamped != *value;
    *value = clamped;
    changed
}

/// `StateVector`: amplitude and coherence in [0,1], phase in [0, 2π),
/// energy equal to amplitude² within [`ENERGY_EPSILON`]
pub struct StateVectorRules;

impl PayloadValidator for StateVectorRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        let Payload::StateVector {
            amplitude,
            phase,
            energy,
            coherence,
        } = payload
        else {
            return Ok(());
        };

        check_finite("amplitude", *amplitude)?;
        check_finite("phase", *phase)?;
        check_finite("energy", *energy)?;
        check_finite("coherence", *coherence)?;

        check_range("amplitude", *amplitude, 0.0, 1.0)?;
        if *phase < 0.0 || *phase >= TAU {
            return Err(ValidationError::OutOfRange {
                field: "phase",
                value: *phase,
                min: 0.0,
                max: TAU,
            });
        }
        check_range("coherence", *coherence, 0.0, 1.0)?;

        let expected = amplitude * amplitude;
        if (energy - expected).abs() > ENERGY_EPSILON {
            return Err(ValidationError::Inconsistent {
                field: "energy",
                expected,
                actual: *energy,
            });
        }
        Ok(())
    }

    fn repair(&self, payload: &mut Payload) -> bool {
        let Payload::StateVector {
            amplitude,
            phase,
            energy,
            coherence,
        } = payload
        else {
            return false;
        };

        if ![*amplitude, *phase, *energy, *coherence].iter().all(|v| v.is_finite()) {
            return false;
        }

        let mut changed = clamp_into(amplitude, 0.0, 1.0);
        changed |= clamp_into(coherence, 0.0, 1.0);

        let wrapped = phase.rem_euclid(TAU);
        // rem_euclid can round up to exactly TAU for tiny negative inputs
        let wrapped = if wrapped >= TAU { 0.0 } else { wrapped };
        if wrapped != *phase {
            *phase = wrapped;
            changed = true;
        }

        let expected = *amplitude * *amplitude;
        if (*energy - expected).abs() > ENERGY_EPSILON {
            *energy = expected;
            changed = true;
        }
        changed
    }
}

/// `ActivityMetric`: non-empty name, level in [0,1], at least one sample
pub struct ActivityMetricRules;

impl PayloadValidator for ActivityMetricRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        let Payload::ActivityMetric {
            name,
            level,
            sample_count,
        } = payload
        else {
            return Ok(());
        };

        check_non_empty("name", name)?;
        check_finite("level", *level)?;
        check_range("level", *level, 0.0, 1.0)?;
        if *sample_count < 1 {
            return Err(ValidationError::TooSmall {
                field: "sample_count",
                value: *sample_count,
                min: 1,
            });
        }
        Ok(())
    }

    fn repair(&self, payload: &mut Payload) -> bool {
        let Payload::ActivityMetric {
            level,
            sample_count,
            ..
        } = payload
        else {
            return false;
        };

        if !level.is_finite() {
            return false;
        }
        let mut changed = clamp_into(level, 0.0, 1.0);
        if *sample_count < 1 {
            *sample_count = 1;
            changed = true;
        }
        changed
    }
}

/// `PatternUpdate`: non-empty id, confidence in [0,1], non-empty weights in [-1,1]
pub struct PatternUpdateRules;

impl PayloadValidator for PatternUpdateRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        let Payload::PatternUpdate {
            pattern_id,
            confidence,
            weights,
        } = payload
        else {
            return Ok(());
        };

        check_non_empty("pattern_id", pattern_id)?;
        check_finite("confidence", *confidence)?;
        check_range("confidence", *confidence, 0.0, 1.0)?;
        if weights.is_empty() {
            return Err(ValidationError::EmptyField { field: "weights" });
        }
        for weight in weights {
            check_finite("weights", *weight)?;
            check_range("weights", *weight, -1.0, 1.0)?;
        }
        Ok(())
    }

    fn repair(&self, payload: &mut Payload) -> bool {
        let Payload::PatternUpdate {
            confidence,
            weights,
            ..
        } = payload
        else {
            return false;
        };

        if !confidence.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return false;
        }
        let mut changed = clamp_into(confidence, 0.0, 1.0);
        for weight in weights.iter_mut() {
            changed |= clamp_into(weight, -1.0, 1.0);
        }
        changed
    }
}

/// `SystemStatus`: cpu and memory percentages in [0,100]
pub struct SystemStatusRules;

impl PayloadValidator for SystemStatusRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        let Payload::SystemStatus {
            cpu_percent,
            memory_percent,
            ..
        } = payload
        else {
            return Ok(());
        };

        check_finite("cpu_percent", *cpu_percent)?;
        check_finite("memory_percent", *memory_percent)?;
        check_range("cpu_percent", *cpu_percent, 0.0, 100.0)?;
        check_range("memory_percent", *memory_percent, 0.0, 100.0)?;
        Ok(())
    }

    fn repair(&self, payload: &mut Payload) -> bool {
        let Payload::SystemStatus {
            cpu_percent,
            memory_percent,
            ..
        } = payload
        else {
            return false;
        };

        if !cpu_percent.is_finite() || !memory_percent.is_finite() {
            return false;
        }
        let changed = clamp_into(cpu_percent, 0.0, 100.0);
        clamp_into(memory_percent, 0.0, 100.0) || changed
    }
}

/// `ErrorReport`: non-empty message
pub struct ErrorReportRules;

impl PayloadValidator for ErrorReportRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        match payload {
            Payload::ErrorReport { message, .. } => check_non_empty("message", message),
            _ => Ok(()),
        }
    }
}

/// `Auth`: non-empty header
pub struct AuthRules;

impl PayloadValidator for AuthRules {
    fn validate(&self, payload: &Payload) -> Result<(), ValidationError> {
        match payload {
            Payload::Auth { header } => check_non_empty("header", header),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(amplitude: f64, phase: f64, energy: f64, coherence: f64) -> Payload {
        Payload::StateVector {
            amplitude,
            phase,
            energy,
            coherence,
        }
    }

    #[test]
    fn test_energy_must_match_amplitude_squared() {
        let rules = StateVectorRules;
        assert!(rules.validate(&state(0.5, 0.0, 0.25, 1.0)).is_ok());
        assert!(rules.validate(&state(0.5, 0.0, 0.25 + 1e-7, 1.0)).is_ok());

        let err = rules.validate(&state(0.5, 0.0, 0.3, 1.0)).unwrap_err();
        assert!(matches!(err, ValidationError::Inconsistent { field: "energy", .. }));
    }

    #[test]
    fn test_phase_upper_bound_is_exclusive() {
        let rules = StateVectorRules;
        assert!(rules.validate(&state(0.0, TAU, 0.0, 0.0)).is_err());
        assert!(rules.validate(&state(0.0, TAU - 1e-9, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_nan_reported_as_not_finite() {
        let rules = StateVectorRules;
        let err = rules.validate(&state(f64::NAN, 0.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err, ValidationError::NotFinite { field: "amplitude" });
    }

    #[test]
    fn test_state_vector_repair_clamps_and_rebalances_energy() {
        let rules = StateVectorRules;
        let mut payload = state(1.5, -0.5, 2.25, 1.2);
        assert!(rules.repair(&mut payload));
        assert!(rules.validate(&payload).is_ok());

        let Payload::StateVector {
            amplitude,
            phase,
            energy,
            coherence,
        } = payload
        else {
            unreachable!()
        };
        assert_eq!(amplitude, 1.0);
        assert_eq!(coherence, 1.0);
        assert!((phase - (TAU - 0.5)).abs() < 1e-12);
        assert!((energy - 1.0).abs() <= ENERGY_EPSILON);
    }

    #[test]
    fn test_state_vector_repair_refuses_non_finite() {
        let rules = StateVectorRules;
        let mut payload = state(f64::INFINITY, 0.0, 0.0, 0.0);
        assert!(!rules.repair(&mut payload));
    }

    #[test]
    fn test_activity_metric_rules() {
        let rules = ActivityMetricRules;
        let ok = Payload::ActivityMetric {
            name: "cortex".into(),
            level: 0.4,
            sample_count: 3,
        };
        assert!(rules.validate(&ok).is_ok());

        let mut bad = Payload::ActivityMetric {
            name: "cortex".into(),
            level: 0.4,
            sample_count: 0,
        };
        assert!(matches!(
            rules.validate(&bad),
            Err(ValidationError::TooSmall { field: "sample_count", .. })
        ));
        assert!(rules.repair(&mut bad));
        assert!(rules.validate(&bad).is_ok());
    }

    #[test]
    fn test_pattern_update_weights() {
        let rules = PatternUpdateRules;
        let mut payload = Payload::PatternUpdate {
            pattern_id: "p-1".into(),
            confidence: 0.9,
            weights: vec![0.5, 1.7, -2.0],
        };
        assert!(matches!(
            rules.validate(&payload),
            Err(ValidationError::OutOfRange { field: "weights", .. })
        ));
        assert!(rules.repair(&mut payload));
        assert!(rules.validate(&payload).is_ok());

        let empty = Payload::PatternUpdate {
            pattern_id: "p-1".into(),
            confidence: 0.9,
            weights: vec![],
        };
        assert_eq!(
            rules.validate(&empty),
            Err(ValidationError::EmptyField { field: "weights" })
        );
    }

    #[test]
    fn test_system_status_percentages() {
        let rules = SystemStatusRules;
        let mut payload = Payload::SystemStatus {
            cpu_percent: 101.0,
            memory_percent: 50.0,
            uptime_secs: 10,
            healthy: true,
        };
        assert!(rules.validate(&payload).is_err());
        assert!(rules.repair(&mut payload));
        assert!(rules.validate(&payload).is_ok());
    }

    #[test]
    fn test_empty_strings_not_repairable() {
        let rules = ErrorReportRules;
        let mut payload = Payload::ErrorReport {
            code: 3,
            message: String::new(),
            severity: crate::protocol::Severity::Error,
        };
        assert!(rules.validate(&payload).is_err());
        assert!(!rules.repair(&mut payload));
    }
}
