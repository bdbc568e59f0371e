//! Critique/refine loop
//!
//! Alternates `Critique(draft) -> feedback` and `Refine(draft, feedback) -> draft'`
//! for at most `max_rounds` rounds. A critique of exactly
//! [`NO_FURTHER_CHANGES`](crate::fields::sentinel::NO_FURTHER_CHANGES) ends the
//! loop early. Running out of rounds is not an error: the last draft wins.

use crate::error::ModelError;
use crate::fields::{self, sentinel};
use crate::model::{context, LanguageModel, ModelTask, TaskRole};
use sip_kernel::stage::{input_text, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, FieldValue, StageKind};
use std::sync::Arc;

/// What the loop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineOutcome {
    pub final_text: String,
    /// Last critique received
    pub critique: String,
    pub critiques: u32,
    pub refinements: u32,
    pub converged: bool,
}

/// Bounded critique/refine iteration
pub struct CritiqueRefineLoop {
    model: Arc<dyn LanguageModel>,
    max_rounds: u32,
}

impl CritiqueRefineLoop {
    /// `max_rounds` below 1 is raised to 1.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, max_rounds: u32) -> Self {
        Self {
            model,
            max_rounds: max_rounds.max(1),
        }
    }

    #[must_use]
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new("critique_refine", StageKind::Composite)
            .reads([fields::DRAFT_REPORT])
            .writes([fields::REPORT_CRITIQUE, fields::FINAL_REPORT_TEXT])
    }

    /// Run the loop over `draft`.
    ///
    /// # Errors
    /// The first model failure.
    pub async fn run(&self, draft: String) -> Result<RefineOutcome, ModelError> {
        let mut outcome = RefineOutcome {
            final_text: draft,
            critique: String::new(),
            critiques: 0,
            refinements: 0,
            converged: false,
        };

        for round in 1..=self.max_rounds {
            let feedback = self
                .model
                .complete(ModelTask::new(TaskRole::Critique).with(context::DRAFT, outcome.final_text.clone()))
                .await?;
            outcome.critiques += 1;

            if feedback.trim() == sentinel::NO_FURTHER_CHANGES {
                tracing::debug!(round, "critique requested no further changes");
                outcome.critique = sentinel::NO_FURTHER_CHANGES.to_string();
                outcome.converged = true;
                break;
            }

            let revised = self
                .model
                .complete(
                    ModelTask::new(TaskRole::Refine)
                        .with(context::DRAFT, outcome.final_text.clone())
                        .with(context::FEEDBACK, feedback.clone()),
                )
                .await?;
            outcome.refinements += 1;
            outcome.final_text = revised;
            outcome.critique = feedback;
        }

        tracing::info!(
            critiques = outcome.critiques,
            refinements = outcome.refinements,
            converged = outcome.converged,
            "refinement finished"
        );
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl StageExecutor for CritiqueRefineLoop {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let outcome = self.run(input_text(&inputs, fields::DRAFT_REPORT)).await?;
        let mut outputs = StageOutputs::new();
        outputs.insert(fields::REPORT_CRITIQUE.into(), FieldValue::text(outcome.critique));
        outputs.insert(fields::FINAL_REPORT_TEXT.into(), FieldValue::text(outcome.final_text));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OfflineModel;

    #[tokio::test]
    async fn single_round_critiques_and_refines_once() {
        let refine = CritiqueRefineLoop::new(Arc::new(OfflineModel), 1);
        let outcome = refine.run("# Draft".to_string()).await.unwrap();
        assert_eq!(outcome.critiques, 1);
        assert_eq!(outcome.refinements, 1);
        assert!(!outcome.converged);
        assert!(outcome.final_text.starts_with("# Draft"));
    }

    #[tokio::test]
    async fn offline_model_converges_on_second_round() {
        let refine = CritiqueRefineLoop::new(Arc::new(OfflineModel), 5);
        let outcome = refine.run("# Draft".to_string()).await.unwrap();
        assert_eq!(outcome.critiques, 2);
        assert_eq!(outcome.refinements, 1);
        assert!(outcome.converged);
        assert_eq!(outcome.critique, sentinel::NO_FURTHER_CHANGES);
    }

    #[test]
    fn zero_rounds_is_raised_to_one() {
        assert_eq!(CritiqueRefineLoop::new(Arc::new(OfflineModel), 0).max_rounds(), 1);
    }
}
