//! Render stage and the artifact renderer boundary
//!
//! The stage hands the finished text to an [`ArtifactRenderer`] together with
//! the configured output directory. Render failures surface as
//! [`ExecutorError::Render`] and end the run; whether they are retried is an
//! engine policy, off by default.

use crate::clock::Clock;
use crate::error::RenderError;
use crate::fields;
use sip_kernel::stage::{input_text, single_output, StageExecutor, StageInputs, StageOutputs, StageSpec};
use sip_kernel::{ExecutorError, StageKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns finished report text into an artifact on disk
#[async_trait::async_trait]
pub trait ArtifactRenderer: Send + Sync {
    /// Render `markdown` into `output_dir`, returning the artifact path.
    async fn render(&self, markdown: &str, output_dir: &Path) -> Result<PathBuf, RenderError>;
}

/// Writes the report as a timestamped Markdown file
pub struct MarkdownFileRenderer {
    clock: Arc<dyn Clock>,
}

impl MarkdownFileRenderer {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// `Inspection_Report_<YYYYmmdd_HHMMSS>`
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("Inspection_Report_{}", self.clock.now().format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait::async_trait]
impl ArtifactRenderer for MarkdownFileRenderer {
    async fn render(&self, markdown: &str, output_dir: &Path) -> Result<PathBuf, RenderError> {
        if markdown.trim().is_empty() {
            return Err(RenderError::EmptyDocument);
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RenderError::Io { path, source }
        };

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(io_err(output_dir))?;

        let stem = self.file_stem();
        let mut path = output_dir.join(format!("{stem}.md"));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.map_err(io_err(&path))? {
            path = output_dir.join(format!("{stem}_{n}.md"));
            n += 1;
        }

        tokio::fs::write(&path, markdown)
            .await
            .map_err(io_err(&path))?;
        tracing::info!(path = %path.display(), bytes = markdown.len(), "report written");
        Ok(path)
    }
}

/// Terminal stage delegating to the renderer
pub struct RenderStage {
    renderer: Arc<dyn ArtifactRenderer>,
    output_dir: PathBuf,
}

impl RenderStage {
    #[must_use]
    pub fn new(renderer: Arc<dyn ArtifactRenderer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            output_dir: output_dir.into(),
        }
    }

    #[must_use]
    pub fn spec(&self) -> StageSpec {
        StageSpec::new("render", StageKind::Render)
            .reads([fields::FINAL_REPORT_TEXT])
            .writes([fields::REPORT_PATH])
    }
}

#[async_trait::async_trait]
impl StageExecutor for RenderStage {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let text = input_text(&inputs, fields::FINAL_REPORT_TEXT);
        let path = self.renderer.render(&text, &self.output_dir).await?;
        Ok(single_output(
            fields::REPORT_PATH,
            path.to_string_lossy().into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;

    fn clock() -> Arc<dyn Clock> {
        let at = NaiveDate::from_ymd_opt(2024, 7, 27)
            .and_then(|d| d.and_hms_opt(15, 30, 0))
            .unwrap();
        Arc::new(FixedClock(at))
    }

    #[tokio::test]
    async fn writes_timestamped_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("output_reports");
        let renderer = MarkdownFileRenderer::new(clock());

        let path = renderer.render("# Report", &out_dir).await.unwrap();
        assert_eq!(path, out_dir.join("Inspection_Report_20240727_153000.md"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report");

        let second = renderer.render("# Again", &out_dir).await.unwrap();
        assert_eq!(second, out_dir.join("Inspection_Report_20240727_153000_1.md"));
    }

    #[tokio::test]
    async fn empty_text_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let stage = RenderStage::new(Arc::new(MarkdownFileRenderer::new(clock())), dir.path());
        let err = stage
            .execute(single_output(fields::FINAL_REPORT_TEXT, "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Render(_)));
    }
}
