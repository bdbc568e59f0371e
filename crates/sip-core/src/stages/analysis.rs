//! Evidence analysis stages (video, audio, text)
//!
//! The three run in parallel on disjoint outputs. Each one skips, writing its
//! own "no evidence" sentinel, when its evidence field is empty.

use crate::fields::{self, sentinel};
use crate::model::{context, LanguageModel, ModelTask, TaskRole};
use sip_kernel::stage::{input_text, single_output, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, StageKind};
use std::sync::Arc;

/// One model-backed analysis branch
pub struct AnalysisStage {
    id: &'static str,
    role: TaskRole,
    input: &'static str,
    output: &'static str,
    sentinel: &'static str,
    model: Arc<dyn LanguageModel>,
}

impl AnalysisStage {
    #[must_use]
    pub fn video(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            id: "analyze_video",
            role: TaskRole::VideoAnalysis,
            input: fields::VIDEO_EVIDENCE_URI,
            output: fields::VIDEO_SUMMARY,
            sentinel: sentinel::NO_VIDEO,
            model,
        }
    }

    #[must_use]
    pub fn audio(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            id: "analyze_audio",
            role: TaskRole::AudioAnalysis,
            input: fields::AUDIO_EVIDENCE_TRANSCRIPT,
            output: fields::AUDIO_SUMMARY,
            sentinel: sentinel::NO_AUDIO,
            model,
        }
    }

    #[must_use]
    pub fn text(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            id: "analyze_text",
            role: TaskRole::TextAnalysis,
            input: fields::TEXTUAL_EVIDENCE,
            output: fields::TEXT_SUMMARY,
            sentinel: sentinel::NO_TEXT,
            model,
        }
    }

    /// Output field and the sentinel written when skipped
    #[must_use]
    pub fn branch(&self) -> (&'static str, &'static str) {
        (self.output, self.sentinel)
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new(self.id, StageKind::Model)
            .optional_reads([self.input])
            .writes([self.output])
            .skip_when_empty(self.sentinel)
    }
}

#[async_trait::async_trait]
impl StageExecutor for AnalysisStage {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let evidence = input_text(&inputs, self.input);
        let summary = self
            .model
            .complete(ModelTask::new(self.role).with(context::EVIDENCE, evidence))
            .await?;
        Ok(single_output(self.output, summary))
    }
}
