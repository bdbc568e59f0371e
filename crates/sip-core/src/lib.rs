//! SIP Core - school inspection evaluation pipeline
//!
//! Turns classroom evidence into a rendered inspection report:
//! - Analyses video, audio and textual evidence in parallel
//! - Consolidates the branch summaries into preliminary findings
//! - Evaluates findings against the inspection framework with bounded retrieval
//! - Drafts, critiques and refines the report, then renders it
//!
//! # Example
//!
//! ```rust,ignore
//! use sip_core::prelude::*;
//!
//! # async fn example() -> Result<(), PipelineError> {
//! let pipeline = InspectionPipeline::builder(PipelineConfig::default()).build()?;
//! let outcome = pipeline.run(EvidenceBundle::new("Lesson plan excerpt: ...")).await;
//! println!("report written to {}", outcome.into_result()?.display());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod fields;
pub mod model;
pub mod pipeline;
pub mod stages;
pub mod telemetry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::PipelineConfig;
pub use error::{ConfigError, ModelError, PipelineError, RenderError};
pub use model::{LanguageModel, ModelTask, OfflineModel, TaskRole};
pub use pipeline::{EvidenceBundle, InspectionOutcome, InspectionPipeline, InspectionPipelineBuilder};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the inspection pipeline
    pub use crate::stages::{ArtifactRenderer, MarkdownFileRenderer};
    pub use crate::{
        Clock, EvidenceBundle, InspectionOutcome, InspectionPipeline, LanguageModel, ModelTask,
        OfflineModel, PipelineConfig, PipelineError, TaskRole,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
