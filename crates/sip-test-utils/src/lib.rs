//! Testing utilities for the SIP workspace
//!
//! Scripted collaborators for the inspection pipeline: a language model with
//! per-role answers and call counts, retrieval backends that count, hang or
//! fail, renderers that record or fail, and evidence fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sip_core::stages::ArtifactRenderer;
use sip_core::{EvidenceBundle, LanguageModel, ModelError, ModelTask, OfflineModel, RenderError, TaskRole};
use sip_retrieval::{BackendError, InMemoryBackend, RetrievalBackend, RetrievalQuery};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Language model with scripted answers per role
///
/// Unscripted roles fall back to [`OfflineModel`]. Every request is counted
/// and kept for inspection.
#[derive(Default)]
pub struct ScriptedModel {
    responses: HashMap<TaskRole, String>,
    failing: HashSet<TaskRole>,
    delays: HashMap<TaskRole, Duration>,
    calls: Mutex<Vec<ModelTask>>,
}

impl ScriptedModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn respond(mut self, role: TaskRole, text: impl Into<String>) -> Self {
        self.responses.insert(role, text.into());
        self
    }

    #[must_use]
    pub fn fail(mut self, role: TaskRole) -> Self {
        self.failing.insert(role);
        self
    }

    /// Sleep before answering `role`.
    #[must_use]
    pub fn delay(mut self, role: TaskRole, by: Duration) -> Self {
        self.delays.insert(role, by);
        self
    }

    #[must_use]
    pub fn calls(&self, role: TaskRole) -> usize {
        self.calls.lock().iter().filter(|t| t.role == role).count()
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests received for `role`, in arrival order
    #[must_use]
    pub fn requests(&self, role: TaskRole) -> Vec<ModelTask> {
        self.calls
            .lock()
            .iter()
            .filter(|t| t.role == role)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, task: ModelTask) -> Result<String, ModelError> {
        let role = task.role;
        self.calls.lock().push(task.clone());

        if let Some(by) = self.delays.get(&role) {
            tokio::time::sleep(*by).await;
        }
        if self.failing.contains(&role) {
            return Err(ModelError::Unavailable(format!("scripted failure for {role}")));
        }
        match self.responses.get(&role) {
            Some(text) => Ok(text.clone()),
            None => OfflineModel.complete(task).await,
        }
    }
}

/// Wraps a backend and records every query it sees
pub struct CountingBackend {
    inner: Arc<dyn RetrievalBackend>,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl CountingBackend {
    #[must_use]
    pub fn new(inner: Arc<dyn RetrievalBackend>) -> Self {
        Self {
            inner,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Counting wrapper over the built-in framework passages
    #[must_use]
    pub fn framework() -> Self {
        Self::new(Arc::new(InMemoryBackend::framework_defaults()))
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    #[must_use]
    pub fn queries(&self) -> Vec<RetrievalQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RetrievalBackend for CountingBackend {
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        self.queries.lock().push(query.clone());
        self.inner.search(query).await
    }
}

/// Backend that never answers
#[derive(Default)]
pub struct HangingBackend {
    calls: AtomicUsize,
}

impl HangingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalBackend for HangingBackend {
    async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Backend whose every call is refused
#[derive(Default)]
pub struct FailingBackend {
    calls: AtomicUsize,
}

impl FailingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalBackend for FailingBackend {
    async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable("connection refused".into()))
    }
}

/// Renderer that keeps documents in memory
///
/// Returns `<output_dir>/report-<n>.md` without touching the filesystem.
#[derive(Default)]
pub struct RecordingRenderer {
    rendered: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.rendered.lock().len()
    }

    /// Last rendered document and its directory
    #[must_use]
    pub fn last(&self) -> Option<(String, PathBuf)> {
        self.rendered.lock().last().cloned()
    }
}

#[async_trait]
impl ArtifactRenderer for RecordingRenderer {
    async fn render(&self, markdown: &str, output_dir: &Path) -> Result<PathBuf, RenderError> {
        let mut rendered = self.rendered.lock();
        rendered.push((markdown.to_string(), output_dir.to_path_buf()));
        Ok(output_dir.join(format!("report-{}.md", rendered.len())))
    }
}

/// Renderer that always rejects the document
#[derive(Default)]
pub struct FailingRenderer {
    calls: AtomicUsize,
}

impl FailingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactRenderer for FailingRenderer {
    async fn render(&self, _markdown: &str, _output_dir: &Path) -> Result<PathBuf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RenderError::Rejected("unsupported glyph".into()))
    }
}

pub mod fixtures {
    use super::EvidenceBundle;

    pub const LESSON_PLAN: &str = "Lesson plan excerpt: Grade 7 science, investigating \
        states of matter through group experiments with exit-ticket assessment.";

    /// Single text-analysis finding; it classifies as teaching and assessment.
    pub const LESSON_SUMMARY: &str =
        "- The lesson plan sets clear objectives and uses exit tickets for assessment.";

    /// Text-only evidence with empty video and audio
    #[must_use]
    pub fn text_only() -> EvidenceBundle {
        EvidenceBundle::new(LESSON_PLAN).with_video("").with_audio("")
    }

    /// All three kinds of evidence
    #[must_use]
    pub fn full() -> EvidenceBundle {
        EvidenceBundle::new(LESSON_PLAN)
            .with_video("file:///evidence/grade7-science.mp4")
            .with_audio(
                "Teacher: What happens to the particles when we heat the ice? \
                 Student: They move faster and spread out.",
            )
    }
}
