//! Stage status transitions.

use crate::types::StageStatus;

/// Illegal stage status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal stage transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: StageStatus,
    pub to: StageStatus,
}

/// Validates a stage status transition.
///
/// Illegal transitions are engine bugs. With the `strict-debug` feature they
/// panic; otherwise the error is returned for the caller to log.
pub fn validate_transition(from: StageStatus, to: StageStatus) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        return Ok(());
    }
    if cfg!(feature = "strict-debug") {
        panic!("Illegal stage transition attempted: {from:?} -> {to:?}");
    }
    Err(IllegalTransition { from, to })
}

#[must_use]
pub fn allowed_transitions(from: StageStatus) -> &'static [StageStatus] {
    use StageStatus::{Cancelled, Completed, Failed, Pending, Running, Skipped};
    match from {
        Pending => &[Running, Skipped, Failed, Cancelled],
        Running => &[Completed, Failed, Cancelled],
        Completed | Skipped | Failed | Cancelled => &[],
    }
}
