//! Framework evaluation stage
//!
//! Parses the preliminary findings, plans at most `K` retrieval queries,
//! runs them, and hands the grouped findings with their framework references
//! to the model. A group whose retrieval failed is still evaluated, just
//! without references.

use crate::fields::{self, sentinel};
use crate::model::{context, LanguageModel, ModelTask, TaskRole};
use sip_kernel::stage::{input_text, single_output, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, StageKind};
use sip_retrieval::{
    Finding, GroupId, GroupResult, QueryPlan, RetrievalClient, RetrievalGroupingPlanner,
    RetrievalResult,
};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Grounds findings in the framework knowledge base
pub struct EvaluationStage {
    planner: RetrievalGroupingPlanner,
    client: RetrievalClient,
    model: Arc<dyn LanguageModel>,
}

impl EvaluationStage {
    #[must_use]
    pub fn new(
        planner: RetrievalGroupingPlanner,
        client: RetrievalClient,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            planner,
            client,
            model,
        }
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new("evaluate", StageKind::Composite)
            .reads([fields::PRELIMINARY_FINDINGS])
            .writes([fields::EVALUATED_FINDINGS])
    }

    /// Plan and run retrieval for `findings`.
    pub async fn retrieve(&self, findings: &[Finding]) -> (QueryPlan, Vec<GroupResult>) {
        let plan = self.planner.plan(findings);
        let results = self.client.query_all(&plan).await;

        let degraded = results.iter().filter(|r| r.result.is_error()).count();
        tracing::info!(
            findings = findings.len(),
            queries = plan.len(),
            degraded,
            "framework retrieval finished"
        );
        (plan, results)
    }
}

#[async_trait::async_trait]
impl StageExecutor for EvaluationStage {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let findings = Finding::parse_document(&input_text(&inputs, fields::PRELIMINARY_FINDINGS));
        if findings.is_empty() {
            return Ok(single_output(
                fields::EVALUATED_FINDINGS,
                sentinel::INSUFFICIENT_EVIDENCE,
            ));
        }

        let (plan, results) = self.retrieve(&findings).await;
        let brief = grouped_brief(&plan, &results);
        let evaluated = self
            .model
            .complete(ModelTask::new(TaskRole::Evaluation).with(context::FINDINGS, brief))
            .await?;
        Ok(single_output(fields::EVALUATED_FINDINGS, evaluated))
    }
}

/// Markdown brief: one section per group with its findings and references.
#[must_use]
pub fn grouped_brief(plan: &QueryPlan, results: &[GroupResult]) -> String {
    let by_group: HashMap<GroupId, &RetrievalResult> =
        results.iter().map(|r| (r.group, &r.result)).collect();

    let mut out = String::new();
    for group in plan.groups() {
        let _ = writeln!(out, "## {}\n", group.category.label());
        for finding in &group.findings {
            let _ = writeln!(out, "- {}", finding.text);
        }
        out.push('\n');
        match by_group.get(&group.id) {
            Some(RetrievalResult::Snippets(snippets)) if !snippets.is_empty() => {
                out.push_str("Framework references:\n");
                for snippet in snippets {
                    let _ = writeln!(out, "> {snippet}");
                }
            }
            Some(RetrievalResult::Error(err)) => {
                let _ = writeln!(
                    out,
                    "Framework references unavailable ({err}); judged on the evidence alone."
                );
            }
            _ => out.push_str("No matching framework references.\n"),
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}
