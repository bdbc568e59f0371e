//! Language model capability
//!
//! Stages describe what they need as a [`ModelTask`]; how the text is produced
//! is up to the [`LanguageModel`] implementation. [`OfflineModel`] is a
//! deterministic stand-in used by the CLI when no hosted model is wired in.

use crate::error::ModelError;
use crate::fields::sentinel;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Which part of the workflow a request serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    VideoAnalysis,
    AudioAnalysis,
    TextAnalysis,
    Evaluation,
    Draft,
    Critique,
    Refine,
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A single request to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelTask {
    pub role: TaskRole,
    pub context: BTreeMap<String, String>,
}

impl ModelTask {
    #[must_use]
    pub fn new(role: TaskRole) -> Self {
        Self {
            role,
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Context value, empty when absent
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.context.get(key).map_or("", String::as_str)
    }
}

/// Text generation capability
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the text for `task`.
    async fn complete(&self, task: ModelTask) -> Result<String, ModelError>;
}

/// Context keys shared between stages and models
pub mod context {
    pub const EVIDENCE: &str = "evidence";
    pub const FINDINGS: &str = "findings";
    pub const EVALUATED_FINDINGS: &str = "evaluated_findings";
    pub const REPORT_DATE: &str = "report_date";
    pub const DRAFT: &str = "draft";
    pub const FEEDBACK: &str = "feedback";
}

const REVIEWED_FOOTER: &str = "_Revised following quality review._";

/// Deterministic rule-based model
///
/// Analysis roles turn each sentence of evidence into a list item, drafting
/// fills a fixed report template, and critique approves any draft that has
/// already been revised once.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineModel;

#[async_trait::async_trait]
impl LanguageModel for OfflineModel {
    async fn complete(&self, task: ModelTask) -> Result<String, ModelError> {
        let text = match task.role {
            TaskRole::VideoAnalysis => format!("- Classroom footage reviewed: {}", task.get(context::EVIDENCE).trim()),
            TaskRole::AudioAnalysis | TaskRole::TextAnalysis => bullets(task.get(context::EVIDENCE)),
            TaskRole::Evaluation => format!("# Evaluated Findings\n\n{}", task.get(context::FINDINGS).trim()),
            TaskRole::Draft => draft(&task),
            TaskRole::Critique => critique(task.get(context::DRAFT)),
            TaskRole::Refine => format!("{}\n\n{REVIEWED_FOOTER}", task.get(context::DRAFT).trim_end()),
        };
        if text.trim().is_empty() {
            return Err(ModelError::Empty(task.role.to_string()));
        }
        Ok(text)
    }
}

fn bullets(evidence: &str) -> String {
    evidence
        .split(['.', '\n'])
        .map(|s| s.trim().trim_start_matches(['-', '*']).trim())
        .filter(|s| !s.is_empty())
        .map(|s| format!("- {s}."))
        .collect::<Vec<_>>()
        .join("\n")
}

fn draft(task: &ModelTask) -> String {
    format!(
        "# School Inspection Report\n\n\
         **Date of Report:** {date}\n\n\
         ## Introduction\n\n\
         This report summarises the evidence reviewed during the inspection and evaluates it \
         against the UAE School Inspection Framework.\n\n\
         ## Overall Performance Judgement\n\n\
         The school's overall effectiveness is judged on the findings below.\n\n\
         ## Key Findings\n\n\
         {findings}\n\n\
         ## Recommendations for Improvement\n\n\
         - Address every finding judged Acceptable or below with a time-bound action plan.",
        date = task.get(context::REPORT_DATE),
        findings = task.get(context::EVALUATED_FINDINGS).trim(),
    )
}

fn critique(draft: &str) -> String {
    if draft.contains(REVIEWED_FOOTER) {
        sentinel::NO_FURTHER_CHANGES.to_string()
    } else {
        "- Confirm every judgement cites the framework.\n- Keep the tone formal and objective."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_analysis_lists_sentences() {
        let out = OfflineModel
            .complete(
                ModelTask::new(TaskRole::TextAnalysis)
                    .with(context::EVIDENCE, "Lessons start promptly. Questioning is weak."),
            )
            .await
            .unwrap();
        assert_eq!(out, "- Lessons start promptly.\n- Questioning is weak.");
    }

    #[tokio::test]
    async fn critique_approves_revised_draft() {
        let first = OfflineModel
            .complete(ModelTask::new(TaskRole::Critique).with(context::DRAFT, "# Report"))
            .await
            .unwrap();
        assert_ne!(first, sentinel::NO_FURTHER_CHANGES);

        let revised = OfflineModel
            .complete(
                ModelTask::new(TaskRole::Refine)
                    .with(context::DRAFT, "# Report")
                    .with(context::FEEDBACK, first),
            )
            .await
            .unwrap();
        let second = OfflineModel
            .complete(ModelTask::new(TaskRole::Critique).with(context::DRAFT, revised))
            .await
            .unwrap();
        assert_eq!(second, sentinel::NO_FURTHER_CHANGES);
    }

    #[tokio::test]
    async fn empty_evidence_is_an_error() {
        let err = OfflineModel
            .complete(ModelTask::new(TaskRole::AudioAnalysis))
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Empty("AudioAnalysis".into()));
    }
}
