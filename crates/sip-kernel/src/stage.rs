//! Stage declarations and the executor capability.
//!
//! A stage declares the fields it reads and writes. The engine depends only on
//! [`StageExecutor`]; whether the work is a local tool, a model call or a
//! composite of several calls is invisible to scheduling.

use crate::error::ExecutorError;
use crate::types::{FieldKey, FieldValue, StageId, StageKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Inputs handed to an executor, keyed by declared read field
pub type StageInputs = BTreeMap<FieldKey, FieldValue>;

/// Outputs returned by an executor; must match the declared write set exactly
pub type StageOutputs = BTreeMap<FieldKey, FieldValue>;

/// Unit of work invoked by the engine
///
/// Implementations may block on network I/O; the engine never awaits one
/// executor while holding up unrelated ready stages.
#[async_trait::async_trait]
pub trait StageExecutor: Send + Sync {
    /// Compute the stage's outputs from its inputs.
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError>;
}

/// When a stage may bypass its executor
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SkipPolicy {
    /// Always execute.
    #[default]
    Never,
    /// Skip when every optional read is empty, writing `sentinel` to every declared output.
    WhenOptionalInputsEmpty { sentinel: FieldValue },
}

/// Declared contract of a stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub id: StageId,
    pub kind: StageKind,
    /// Fields that must be present
    pub reads: BTreeSet<FieldKey>,
    /// Fields that read as the empty sentinel when absent
    pub optional_reads: BTreeSet<FieldKey>,
    pub writes: BTreeSet<FieldKey>,
    pub skip_policy: SkipPolicy,
}

impl StageSpec {
    pub fn new(id: impl Into<StageId>, kind: StageKind) -> Self {
        Self {
            id: id.into(),
            kind,
            reads: BTreeSet::new(),
            optional_reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            skip_policy: SkipPolicy::Never,
        }
    }

    #[must_use]
    pub fn reads<K: Into<FieldKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn optional_reads<K: Into<FieldKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.optional_reads.extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn writes<K: Into<FieldKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.writes.extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn skip_when_empty(mut self, sentinel: impl Into<FieldValue>) -> Self {
        self.skip_policy = SkipPolicy::WhenOptionalInputsEmpty {
            sentinel: sentinel.into(),
        };
        self
    }

    /// Required and optional reads together.
    pub fn all_reads(&self) -> impl Iterator<Item = &FieldKey> {
        self.reads.iter().chain(self.optional_reads.iter())
    }

    /// The sentinel to write instead of executing, if the skip policy applies to `inputs`.
    #[must_use]
    pub fn skip_sentinel(&self, inputs: &StageInputs) -> Option<&FieldValue> {
        match &self.skip_policy {
            SkipPolicy::Never => None,
            SkipPolicy::WhenOptionalInputsEmpty { sentinel } => {
                let all_empty = !self.optional_reads.is_empty()
                    && self
                        .optional_reads
                        .iter()
                        .all(|k| inputs.get(k).map_or(true, FieldValue::is_empty));
                all_empty.then_some(sentinel)
            }
        }
    }

    /// Check `outputs` against the declared write set.
    ///
    /// # Errors
    /// `UndeclaredOutput` for an extra key, `MissingOutput` for an absent one.
    pub fn check_outputs(&self, outputs: &StageOutputs) -> Result<(), ExecutorError> {
        if let Some(extra) = outputs.keys().find(|k| !self.writes.contains(*k)) {
            return Err(ExecutorError::UndeclaredOutput(extra.clone()));
        }
        if let Some(missing) = self.writes.iter().find(|k| !outputs.contains_key(*k)) {
            return Err(ExecutorError::MissingOutput(missing.clone()));
        }
        Ok(())
    }
}

/// A declared stage bound to its executor
#[derive(Clone)]
pub struct Stage {
    pub spec: StageSpec,
    pub executor: Arc<dyn StageExecutor>,
}

impl Stage {
    pub fn new(spec: StageSpec, executor: Arc<dyn StageExecutor>) -> Self {
        Self { spec, executor }
    }

    #[must_use]
    pub fn id(&self) -> &StageId {
        &self.spec.id
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("spec", &self.spec).finish_non_exhaustive()
    }
}

/// Deterministic tool stage backed by a plain function
pub struct ToolExecutor<F> {
    f: F,
}

impl<F> ToolExecutor<F>
where
    F: Fn(&StageInputs) -> Result<StageOutputs, ExecutorError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wrap as a shared executor.
    pub fn shared(f: F) -> Arc<dyn StageExecutor> {
        Arc::new(Self::new(f))
    }
}

#[async_trait::async_trait]
impl<F> StageExecutor for ToolExecutor<F>
where
    F: Fn(&StageInputs) -> Result<StageOutputs, ExecutorError> + Send + Sync + 'static,
{
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        (self.f)(&inputs)
    }
}

/// Outputs holding a single field.
pub fn single_output(key: impl Into<FieldKey>, value: impl Into<FieldValue>) -> StageOutputs {
    let mut outputs = StageOutputs::new();
    outputs.insert(key.into(), value.into());
    outputs
}

/// Read a text input, treating an absent key as empty.
#[must_use]
pub fn input_text(inputs: &StageInputs, key: &str) -> String {
    inputs
        .get(&FieldKey::from(key))
        .map(FieldValue::to_text)
        .unwrap_or_default()
}
