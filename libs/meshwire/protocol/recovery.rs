//! Repair of received messages that drifted out of range
//!
//! Outbound messages are never repaired: `send` rejects them. Messages read
//! off the wire go through [`MessageRecovery::process`]:
//!
//! ```text
//! valid ───────────────────────────────> accept, remember as last good,
//!                                        drop any RecoveryState
//! invalid ─> attempt < max ─> clamp ─> valid again ─> accept repaired value
//!                 │                └─> still invalid ─┐
//!                 └─> attempt >= max ─────────────────┴─> restore last good
//!                                                         snapshot, fail
//! ```
//!
//! Consecutive repaired messages count against the same attempt budget; the
//! budget resets only when a message arrives valid on its own.

use super::message::{now_millis, Message};
use super::validation::{ValidationError, ValidatorRegistry};
use crate::error::{MeshError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Entries kept in the recovery log before the oldest are dropped
pub const MAX_LOG_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryStatus {
    /// A repair is in progress for the current message
    Recovering,
    /// The last invalid message was repaired
    Recovered,
    /// Repair failed and the snapshot was restored
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    /// Offending fields were clamped and the message re-validated
    Clamped,
    /// Repair was impossible or the budget was spent; last good snapshot restored
    RestoredSnapshot,
}

/// One line of the recovery log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryLogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub error: String,
    pub action: RecoveryAction,
    pub success: bool,
}

/// Bookkeeping for one drift episode
///
/// Created on the first invalid message, discarded once a message arrives
/// valid or when recovery fails for good.
#[derive(Debug, Clone)]
pub struct RecoveryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<ValidationError>,
    /// Milliseconds since the Unix epoch
    pub last_attempt_time: u64,
    pub retry_delay: Duration,
    pub status: RecoveryStatus,
    /// Last message accepted before the episode started
    pub state_snapshot: Option<Message>,
}

/// Validates received messages and repairs them within a bounded budget
pub struct MessageRecovery {
    validators: Arc<ValidatorRegistry>,
    max_attempts: u32,
    retry_delay: Duration,
    state: Option<RecoveryState>,
    last_good: Option<Message>,
    log: VecDeque<RecoveryLogEntry>,
}

impl MessageRecovery {
    pub fn new(validators: Arc<ValidatorRegistry>, max_attempts: u32) -> Self {
        Self {
            validators,
            max_attempts,
            retry_delay: Duration::ZERO,
            state: None,
            last_good: None,
            log: VecDeque::new(),
        }
    }

    /// Delay recorded in the recovery state between repair attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Validate `message`, repairing it if the budget allows
    pub fn process(&mut self, message: Message) -> Result<Message> {
        let error = match self.validators.validate(&message) {
            Ok(()) => {
                if self.state.take().is_some() {
                    debug!("Valid {} message received, recovery episode closed", message.kind());
                }
                self.last_good = Some(message.clone());
                return Ok(message);
            }
            Err(e) => e,
        };

        let snapshot = self.last_good.clone();
        let (max_attempts, retry_delay) = (self.max_attempts, self.retry_delay);
        let state = self.state.get_or_insert_with(|| RecoveryState {
            attempt: 0,
            max_attempts,
            last_error: None,
            last_attempt_time: 0,
            retry_delay,
            status: RecoveryStatus::Recovering,
            state_snapshot: snapshot,
        });

        if state.attempt >= state.max_attempts {
            let reason = format!("repair budget of {} spent, last error: {}", state.max_attempts, error);
            return Err(self.fail(error, reason));
        }

        state.attempt += 1;
        state.last_error = Some(error.clone());
        state.last_attempt_time = now_millis();
        state.status = RecoveryStatus::Recovering;

        if error.is_envelope() {
            return Err(self.fail(error.clone(), format!("envelope violation: {}", error)));
        }

        let mut repaired = message;
        if self.validators.repair(&mut repaired) && self.validators.validate(&repaired).is_ok() {
            warn!(
                "Repaired {} message from '{}' ({})",
                repaired.kind(),
                repaired.source_id,
                error
            );
            if let Some(state) = self.state.as_mut() {
                state.status = RecoveryStatus::Recovered;
            }
            self.record(RecoveryLogEntry {
                timestamp: now_millis(),
                error: error.to_string(),
                action: RecoveryAction::Clamped,
                success: true,
            });
            self.last_good = Some(repaired.clone());
            return Ok(repaired);
        }

        Err(self.fail(error.clone(), format!("not repairable: {}", error)))
    }

    /// Restore the snapshot, close the episode and build the terminal error
    fn fail(&mut self, error: ValidationError, reason: String) -> MeshError {
        let attempts = self.state.as_ref().map(|s| s.attempt).unwrap_or(0);
        if let Some(mut state) = self.state.take() {
            state.status = RecoveryStatus::Failed;
            self.last_good = state.state_snapshot.take().or_else(|| self.last_good.take());
        }

        error!("Message recovery failed after {} attempts: {}", attempts, reason);
        self.record(RecoveryLogEntry {
            timestamp: now_millis(),
            error: error.to_string(),
            action: RecoveryAction::RestoredSnapshot,
            success: false,
        });

        MeshError::RecoveryFailed { attempts, reason }
    }

    fn record(&mut self, entry: RecoveryLogEntry) {
        if self.log.len() == MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    /// The current drift episode, if any
    pub fn state(&self) -> Option<&RecoveryState> {
        self.state.as_ref()
    }

    /// Last message accepted (or restored after a failed recovery)
    pub fn last_good(&self) -> Option<&Message> {
        self.last_good.as_ref()
    }

    /// Snapshot of the recovery log, oldest first
    pub fn log(&self) -> Vec<RecoveryLogEntry> {
        self.log.iter().cloned().collect()
    }
}
