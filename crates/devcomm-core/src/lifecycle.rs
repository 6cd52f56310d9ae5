//! Delivery lifecycle of a persisted protocol message.
//!
//! # States
//!
//! - `Received`: raw frame stored, nothing decoded yet
//! - `Parsed`: frame decoded and checksum verified
//! - `Validated`: required envelope fields present
//! - `Processed`: business service accepted the message
//! - `Failed`: terminal failure, never retried
//! - `RetryScheduled`: retryable failure waiting for `next_retry_time`
//! - `Dead`: retry budget exhausted
//! - `Ignored`: duplicate of an already processed message
//!
//! # Valid Transitions
//!
//! - Received → Parsed → Validated → Processed
//! - Received/Parsed/Validated → Failed, or on to RetryScheduled/Dead in
//!   the same write
//! - Failed → RetryScheduled → Received (next attempt)
//! - Failed → Dead
//! - Received/Parsed/Validated/RetryScheduled → Ignored
//!
//! A failure is always resolved within one persisted transition: the record
//! moves straight to `Failed`, `RetryScheduled` or `Dead`, passing through
//! `Failed` only logically. [`LifecycleState::can_fail_to`] checks the
//! combined hop before it is written.

use crate::{Result, error::Error, types::MessageStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Received,
    Parsed,
    Validated,
    Processed,
    Failed,
    RetryScheduled,
    Dead,
    Ignored,
}

impl LifecycleState {
    /// All states, in declaration order.
    pub const ALL: [LifecycleState; 8] = [
        LifecycleState::Received,
        LifecycleState::Parsed,
        LifecycleState::Validated,
        LifecycleState::Processed,
        LifecycleState::Failed,
        LifecycleState::RetryScheduled,
        LifecycleState::Dead,
        LifecycleState::Ignored,
    ];

    /// Check if a transition from this state to the target is allowed.
    #[must_use]
    pub fn can_transition_to(&self, target: &LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, target),
            // Forward path
            (Received, Parsed)
            | (Parsed, Validated)
            | (Validated, Processed)
            // Failures
            | (Received | Parsed | Validated, Failed)
            | (Failed, RetryScheduled | Dead)
            // Next attempt
            | (RetryScheduled, Received)
            // Duplicates
            | (Received | Parsed | Validated | RetryScheduled, Ignored)
        )
    }

    /// Check if a failure observed in this state may resolve to `target`.
    #[must_use]
    pub fn can_fail_to(&self, target: &LifecycleState) -> bool {
        self.can_transition_to(&LifecycleState::Failed)
            && (*target == LifecycleState::Failed
                || LifecycleState::Failed.can_transition_to(target))
    }

    /// Returns an error unless `target` is reachable in one step.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` for illegal transitions.
    pub fn ensure_transition(&self, target: &LifecycleState) -> Result<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Terminal states never change again.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Processed
                | LifecycleState::Failed
                | LifecycleState::Dead
                | LifecycleState::Ignored
        )
    }

    /// States in which an attempt is currently being worked on.
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            LifecycleState::Received | LifecycleState::Parsed | LifecycleState::Validated
        )
    }

    /// Coarse status persisted next to the lifecycle position.
    #[must_use]
    pub fn message_status(&self) -> MessageStatus {
        match self {
            LifecycleState::Received | LifecycleState::Parsed | LifecycleState::Validated => {
                MessageStatus::Pending
            }
            LifecycleState::Processed => MessageStatus::Processed,
            LifecycleState::Failed | LifecycleState::RetryScheduled | LifecycleState::Dead => {
                MessageStatus::Failed
            }
            LifecycleState::Ignored => MessageStatus::Ignored,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Received => "RECEIVED",
            LifecycleState::Parsed => "PARSED",
            LifecycleState::Validated => "VALIDATED",
            LifecycleState::Processed => "PROCESSED",
            LifecycleState::Failed => "FAILED",
            LifecycleState::RetryScheduled => "RETRY_SCHEDULED",
            LifecycleState::Dead => "DEAD",
            LifecycleState::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Storage(format!("unknown lifecycle state: {s}")))
    }
}
