//! Concrete pipeline stages
//!
//! Each stage type exposes `spec()` (its id, kind and read/write sets) and
//! implements [`StageExecutor`](sip_kernel::stage::StageExecutor).

pub mod analysis;
pub mod draft;
pub mod evaluation;
pub mod refine;
pub mod render;
pub mod synthesis;

pub use analysis::AnalysisStage;
pub use draft::DraftStage;
pub use evaluation::{grouped_brief, EvaluationStage};
pub use refine::{CritiqueRefineLoop, RefineOutcome};
pub use render::{ArtifactRenderer, MarkdownFileRenderer, RenderStage};
pub use synthesis::SynthesisAggregator;
