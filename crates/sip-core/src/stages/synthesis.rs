//! Synthesis aggregator (fan-in)

use crate::fields::{self, sentinel};
use sip_kernel::stage::{input_text, single_output, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, StageKind};

/// Consolidates branch summaries, dropping skipped branches.
///
/// A branch is dropped only when its value is exactly its own sentinel (or
/// blank); a summary that merely mentions a sentinel phrase is kept.
#[derive(Debug, Clone)]
pub struct SynthesisAggregator {
    branches: Vec<(&'static str, &'static str)>,
}

impl SynthesisAggregator {
    /// Branch output fields paired with their skip sentinels
    #[must_use]
    pub fn new(branches: Vec<(&'static str, &'static str)>) -> Self {
        Self { branches }
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new("synthesize", StageKind::Tool)
            .reads(self.branches.iter().map(|(field, _)| *field))
            .writes([fields::PRELIMINARY_FINDINGS])
    }

    /// The consolidated document for `inputs`.
    #[must_use]
    pub fn consolidate(&self, inputs: &StageInputs) -> String {
        let valid: Vec<String> = self
            .branches
            .iter()
            .map(|(field, skip)| (input_text(inputs, field), *skip))
            .filter(|(value, skip)| value != skip && !value.trim().is_empty())
            .map(|(value, _)| value)
            .collect();

        if valid.is_empty() {
            tracing::info!("no branch produced evidence");
            return sentinel::INSUFFICIENT_EVIDENCE.to_string();
        }
        valid.join("\n\n")
    }
}

impl Default for SynthesisAggregator {
    fn default() -> Self {
        Self::new(vec![
            (fields::VIDEO_SUMMARY, sentinel::NO_VIDEO),
            (fields::AUDIO_SUMMARY, sentinel::NO_AUDIO),
            (fields::TEXT_SUMMARY, sentinel::NO_TEXT),
        ])
    }
}

#[async_trait::async_trait]
impl StageExecutor for SynthesisAggregator {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        Ok(single_output(fields::PRELIMINARY_FINDINGS, self.consolidate(&inputs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inputs(video: &str, audio: &str, text: &str) -> StageInputs {
        let mut inputs = single_output(fields::VIDEO_SUMMARY, video);
        inputs.extend(single_output(fields::AUDIO_SUMMARY, audio));
        inputs.extend(single_output(fields::TEXT_SUMMARY, text));
        inputs
    }

    #[test]
    fn drops_exact_sentinels_only() {
        let agg = SynthesisAggregator::default();
        let doc = agg.consolidate(&inputs(
            sentinel::NO_VIDEO,
            sentinel::NO_AUDIO,
            "- Lessons are well planned.",
        ));
        assert_eq!(doc, "- Lessons are well planned.");
    }

    #[test]
    fn matching_is_case_sensitive_and_not_substring() {
        let agg = SynthesisAggregator::default();
        let doc = agg.consolidate(&inputs(
            "no video evidence provided.",
            "Note: No audio evidence provided. for period 2",
            sentinel::NO_TEXT,
        ));
        assert_eq!(
            doc,
            "no video evidence provided.\n\nNote: No audio evidence provided. for period 2"
        );
    }

    #[test]
    fn sentinel_of_another_branch_is_kept() {
        let agg = SynthesisAggregator::default();
        let doc = agg.consolidate(&inputs(sentinel::NO_AUDIO, sentinel::NO_AUDIO, sentinel::NO_TEXT));
        assert_eq!(doc, sentinel::NO_AUDIO);
    }

    #[test]
    fn all_skipped_yields_marker() {
        let agg = SynthesisAggregator::default();
        let doc = agg.consolidate(&inputs(sentinel::NO_VIDEO, sentinel::NO_AUDIO, sentinel::NO_TEXT));
        assert_eq!(doc, sentinel::INSUFFICIENT_EVIDENCE);
    }
}
