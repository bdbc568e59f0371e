//! Report drafting stage

use crate::clock::Clock;
use crate::fields;
use crate::model::{context, LanguageModel, ModelTask, TaskRole};
use sip_kernel::stage::{input_text, single_output, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, StageKind};
use std::sync::Arc;

/// Writes the first full draft from the evaluated findings
pub struct DraftStage {
    model: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
}

impl DraftStage {
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, clock: Arc<dyn Clock>) -> Self {
        Self { model, clock }
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new("draft_report", StageKind::Model)
            .reads([fields::EVALUATED_FINDINGS])
            .writes([fields::DRAFT_REPORT])
    }
}

#[async_trait::async_trait]
impl StageExecutor for DraftStage {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let task = ModelTask::new(TaskRole::Draft)
            .with(
                context::EVALUATED_FINDINGS,
                input_text(&inputs, fields::EVALUATED_FINDINGS),
            )
            .with(context::REPORT_DATE, self.clock.report_date());
        let draft = self.model.complete(task).await?;
        Ok(single_output(fields::DRAFT_REPORT, draft))
    }
}
