//! Error taxonomy for graph construction and run execution.
//!
//! - [`StateError`]: blackboard misuse (absent required field, second write)
//! - [`GraphError`]: construction-time defects in the stage graph
//! - [`ExecutorError`]: a stage's own computation or contract failed
//! - [`RunError`]: the single structured failure reported for a run

use crate::types::{FieldKey, StageId};
use std::time::Duration;

/// Blackboard errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A required field was read before anything wrote it
    #[error("required field `{field}` is absent")]
    MissingField { field: FieldKey },

    /// A field was written twice
    #[error("field `{field}` already written by `{existing_writer}`, rejected write from `{writer}`")]
    DuplicateWrite {
        field: FieldKey,
        existing_writer: StageId,
        writer: StageId,
    },
}

/// Graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no stages")]
    EmptyGraph,

    #[error("stage `{0}` declared twice")]
    DuplicateStage(StageId),

    /// Two ordered stages write the same field; the second write could never succeed
    #[error("field `{field}` has two writers: `{first}` and `{second}`")]
    DuplicateWriter {
        field: FieldKey,
        first: StageId,
        second: StageId,
    },

    /// Two stages with no path between them write the same field
    #[error("concurrent stages `{first}` and `{second}` both write `{field}`")]
    ConcurrentWriteConflict {
        field: FieldKey,
        first: StageId,
        second: StageId,
    },

    #[error("cycle detected through stage `{stage}`")]
    CycleDetected { stage: StageId },

    /// A field appears in both the required and optional read sets
    #[error("stage `{stage}` declares `{field}` as both required and optional")]
    AmbiguousRead { stage: StageId, field: FieldKey },

    /// A skip policy needs at least one optional read to inspect
    #[error("stage `{0}` has a skip policy but no optional reads")]
    SkipWithoutOptionalReads(StageId),
}

/// Failures raised by (or about) a stage executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The stage's computation failed
    #[error("stage computation failed: {0}")]
    Failed(String),

    /// The external artifact renderer rejected the text
    #[error("render failed: {0}")]
    Render(String),

    #[error("input `{0}` missing")]
    MissingInput(FieldKey),

    #[error("stage wrote undeclared field `{0}`")]
    UndeclaredOutput(FieldKey),

    #[error("stage did not write declared field `{0}`")]
    MissingOutput(FieldKey),

    #[error("stage task panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether a retry policy may re-invoke the executor after this error.
    ///
    /// Contract violations are deterministic and never retried.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Render(_))
    }
}

/// The one structured failure a run reports
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// Required input absent; no stage was started
    #[error("missing required field `{field}`")]
    MissingField { field: FieldKey },

    /// Caller supplied a field some stage produces; no stage was started
    #[error("input `{field}` is produced by stage `{stage}`")]
    InputConflict { field: FieldKey, stage: StageId },

    #[error("duplicate write to `{field}` by stage `{stage}`")]
    DuplicateWrite { field: FieldKey, stage: StageId },

    #[error("run failed at stage `{stage}`: {cause}")]
    StageFailed { stage: StageId, cause: ExecutorError },

    #[error("render stage `{stage}` failed: {message}")]
    RenderFailed { stage: StageId, message: String },

    /// No stage is running or ready but the graph is incomplete
    #[error("graph cannot make progress; pending stages: {pending:?}")]
    Unschedulable { pending: Vec<StageId> },

    #[error("run exceeded its deadline of {after:?}")]
    Timeout { after: Duration },
}

impl RunError {
    /// Stage that originated the failure, when one did.
    #[must_use]
    pub fn stage(&self) -> Option<&StageId> {
        match self {
            Self::DuplicateWrite { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::RenderFailed { stage, .. } => Some(stage),
            Self::MissingField { .. }
            | Self::InputConflict { .. }
            | Self::Unschedulable { .. }
            | Self::Timeout { .. } => None,
        }
    }

    /// Build the run failure for a stage error, promoting render errors.
    #[must_use]
    pub fn from_stage(stage: StageId, cause: ExecutorError) -> Self {
        match cause {
            ExecutorError::Render(message) => Self::RenderFailed { stage, message },
            cause => Self::StageFailed { stage, cause },
        }
    }
}

impl From<StateError> for RunError {
    fn from(value: StateError) -> Self {
        match value {
            StateError::MissingField { field } => Self::MissingField { field },
            StateError::DuplicateWrite { field, writer, .. } => Self::DuplicateWrite {
                field,
                stage: writer,
            },
        }
    }
}
