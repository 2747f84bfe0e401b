//! Config Entry State Machine
//!
//! Valid lifecycle transitions:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!                            ↘ SetupRetry → SetupInProgress (auto-retry)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to a new state.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded)
                | (SetupInProgress, SetupError)
                | (SetupInProgress, SetupRetry)
                | (SetupInProgress, MigrationError)
                | (SetupError, SetupInProgress)
                | (SetupError, UnloadInProgress)
                | (SetupRetry, SetupInProgress)
                | (SetupRetry, UnloadInProgress)
                | (Loaded, UnloadInProgress)
                | (UnloadInProgress, NotLoaded)
                | (UnloadInProgress, FailedUnload)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
    use ConfigEntryState::*;

    match (from, to) {
        (MigrationError, _) => "MigrationError is terminal - entry cannot recover",
        (FailedUnload, _) => "FailedUnload is terminal - entry cannot recover",
        (SetupInProgress, NotLoaded) => {
            "Setup in progress - must complete before returning to NotLoaded"
        }
        (UnloadInProgress, Loaded) => "Unload in progress - cannot go back to Loaded",
        (NotLoaded, Loaded) => "Cannot jump to Loaded - must go through SetupInProgress",
        (NotLoaded, MigrationError) => {
            "Cannot jump to MigrationError - must go through SetupInProgress"
        }
        (Loaded, NotLoaded) => "Cannot jump to NotLoaded - must go through UnloadInProgress",
        (Loaded, SetupInProgress) => "Already loaded - unload first before re-setup",
        _ => "Invalid state transition",
    }
}

/// Delay before the next setup attempt of an entry that was not ready.
///
/// `5s * 2^min(tries, 4)` plus up to 100ms of jitter: 5s, 10s, 20s, 40s,
/// then 80s for every later attempt.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base_secs = 2_u64.pow(tries.min(4)) * 5;
    let jitter_ms = rand::random::<u64>() % 100;
    Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)
}
