//! Inspection pipeline composition
//!
//! Wires the concrete stages into a production stage graph:
//!
//! ```text
//! analyze_video ─┐
//! analyze_audio ─┼─> synthesize -> evaluate -> draft_report -> critique_refine -> render
//! analyze_text  ─┘
//! ```
//!
//! Collaborators (model, retrieval backend, renderer, clock) are injected
//! through [`InspectionPipelineBuilder`]; anything not supplied falls back to
//! the offline defaults.

use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fields;
use crate::model::{LanguageModel, OfflineModel};
use crate::stages::{
    AnalysisStage, ArtifactRenderer, CritiqueRefineLoop, DraftStage, EvaluationStage,
    MarkdownFileRenderer, RenderStage, SynthesisAggregator,
};
use serde::{Deserialize, Serialize};
use sip_kernel::engine::{PipelineEngine, Run};
use sip_kernel::events::RunEvent;
use sip_kernel::graph::{StageGraph, StageGraphBuilder};
use sip_kernel::{FieldKey, FieldValue, GraphType, RunError};
use sip_retrieval::{InMemoryBackend, RetrievalBackend, RetrievalClient, RetrievalGroupingPlanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Evidence accepted at the run invocation boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub textual_evidence: String,
    #[serde(default)]
    pub video_evidence_uri: Option<String>,
    #[serde(default)]
    pub audio_evidence_transcript: Option<String>,
}

impl EvidenceBundle {
    #[must_use]
    pub fn new(textual_evidence: impl Into<String>) -> Self {
        Self {
            textual_evidence: textual_evidence.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_video(mut self, uri: impl Into<String>) -> Self {
        self.video_evidence_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_audio(mut self, transcript: impl Into<String>) -> Self {
        self.audio_evidence_transcript = Some(transcript.into());
        self
    }

    /// Initial blackboard fields. Absent optional evidence is left out and
    /// reads as empty.
    #[must_use]
    pub fn into_inputs(self) -> Vec<(FieldKey, FieldValue)> {
        let mut inputs = vec![(
            FieldKey::from(fields::TEXTUAL_EVIDENCE),
            FieldValue::text(self.textual_evidence),
        )];
        if let Some(uri) = self.video_evidence_uri {
            inputs.push((fields::VIDEO_EVIDENCE_URI.into(), FieldValue::text(uri)));
        }
        if let Some(transcript) = self.audio_evidence_transcript {
            inputs.push((
                fields::AUDIO_EVIDENCE_TRANSCRIPT.into(),
                FieldValue::text(transcript),
            ));
        }
        inputs
    }
}

/// A finished run and, on success, the rendered artifact
#[derive(Debug, Clone)]
pub struct InspectionOutcome {
    pub run: Run,
    pub artifact_path: Option<PathBuf>,
}

impl InspectionOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.run.is_completed()
    }

    #[must_use]
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Final report text, when the run completed
    #[must_use]
    pub fn report_text(&self) -> Option<&str> {
        self.run
            .output(fields::FINAL_REPORT_TEXT)
            .and_then(FieldValue::as_text)
    }

    /// The artifact path, or the reason the run failed.
    ///
    /// # Errors
    /// `PipelineError::Run` carrying the originating stage and cause.
    pub fn into_result(self) -> Result<PathBuf, PipelineError> {
        self.run.into_result()?;
        self.artifact_path.ok_or_else(|| {
            PipelineError::Run(RunError::MissingField {
                field: fields::REPORT_PATH.into(),
            })
        })
    }
}

/// The composed inspection pipeline
#[derive(Debug)]
pub struct InspectionPipeline {
    config: PipelineConfig,
    graph: StageGraph,
    engine: PipelineEngine,
}

impl InspectionPipeline {
    #[must_use]
    pub fn builder(config: PipelineConfig) -> InspectionPipelineBuilder {
        InspectionPipelineBuilder::new(config)
    }

    /// Offline pipeline with default configuration.
    ///
    /// # Errors
    /// See [`InspectionPipelineBuilder::build`].
    pub fn offline() -> Result<Self, PipelineError> {
        Self::builder(PipelineConfig::default()).build()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Run the pipeline over one evidence bundle.
    pub async fn run(&self, evidence: EvidenceBundle) -> InspectionOutcome {
        let run = self.engine.run(&self.graph, evidence.into_inputs()).await;

        let artifact_path = if run.is_completed() {
            run.output(fields::REPORT_PATH)
                .and_then(FieldValue::as_text)
                .map(PathBuf::from)
        } else {
            None
        };

        match run.failure() {
            Some(err) => tracing::error!(
                run_id = %run.id(),
                stage = err.stage().map(|s| s.as_str()),
                error = %err,
                "inspection run failed"
            ),
            None => tracing::info!(
                run_id = %run.id(),
                elapsed_ms = u64::try_from(run.elapsed().as_millis()).unwrap_or(u64::MAX),
                "inspection run completed"
            ),
        }

        InspectionOutcome { run, artifact_path }
    }
}

/// Injects collaborators before the graph is frozen
pub struct InspectionPipelineBuilder {
    config: PipelineConfig,
    model: Option<Arc<dyn LanguageModel>>,
    backend: Option<Arc<dyn RetrievalBackend>>,
    renderer: Option<Arc<dyn ArtifactRenderer>>,
    clock: Option<Arc<dyn Clock>>,
    event_sink: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl InspectionPipelineBuilder {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            model: None,
            backend: None,
            renderer: None,
            clock: None,
            event_sink: None,
        }
    }

    #[must_use]
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn ArtifactRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Forward run events as they happen.
    #[must_use]
    pub fn event_sink(mut self, sink: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Validate the configuration and freeze the stage graph.
    ///
    /// # Errors
    /// Invalid configuration, an unreadable corpus, or a graph defect.
    pub fn build(self) -> Result<InspectionPipeline, PipelineError> {
        let config = self.config;
        config.validate()?;

        let model = self.model.unwrap_or_else(|| Arc::new(OfflineModel));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let collection = &config.knowledge_base.collection;
        let backend: Arc<dyn RetrievalBackend> = match (self.backend, &config.knowledge_base.corpus_dir) {
            (Some(backend), _) => backend,
            (None, Some(dir)) => Arc::new(InMemoryBackend::from_dir(dir)?.with_collection(collection)),
            (None, None) => Arc::new(InMemoryBackend::framework_defaults().with_collection(collection)),
        };
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(MarkdownFileRenderer::new(Arc::clone(&clock))));

        let planner =
            RetrievalGroupingPlanner::new(config.retrieval.max_queries, config.retrieval.top_k)?;
        let client = RetrievalClient::new(backend, config.client_config());

        let mut builder = StageGraphBuilder::new(GraphType::Production);

        let branches = [
            AnalysisStage::video(Arc::clone(&model)),
            AnalysisStage::audio(Arc::clone(&model)),
            AnalysisStage::text(Arc::clone(&model)),
        ];
        let aggregator = SynthesisAggregator::new(branches.iter().map(AnalysisStage::branch).collect());
        for branch in branches {
            builder.add_stage(branch.spec(), Arc::new(branch))?;
        }
        builder.add_stage(aggregator.spec(), Arc::new(aggregator))?;

        let evaluate = EvaluationStage::new(planner, client, Arc::clone(&model));
        builder.add_stage(evaluate.spec(), Arc::new(evaluate))?;

        let draft = DraftStage::new(Arc::clone(&model), clock);
        builder.add_stage(draft.spec(), Arc::new(draft))?;

        let refine = CritiqueRefineLoop::new(model, config.refine.max_rounds);
        builder.add_stage(refine.spec(), Arc::new(refine))?;

        let render = RenderStage::new(renderer, config.render.output_dir.clone());
        builder.add_stage(render.spec(), Arc::new(render))?;

        let graph = builder.build()?;
        tracing::debug!(
            stages = graph.len(),
            edges = graph.edge_count(),
            "inspection graph built"
        );

        let mut engine = PipelineEngine::new(config.engine_config());
        if let Some(sink) = self.event_sink {
            engine = engine.with_event_sink(sink);
        }

        Ok(InspectionPipeline {
            config,
            graph,
            engine,
        })
    }
}
