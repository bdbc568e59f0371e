//! Error types for the inspection pipeline
//!
//! - [`ConfigError`]: configuration could not be read or is inconsistent
//! - [`ModelError`]: the language model capability failed
//! - [`RenderError`]: the artifact renderer failed
//! - [`PipelineError`]: anything that stops a pipeline from being built or
//!   a run from producing a report

use sip_kernel::{ExecutorError, GraphError, RunError};
use sip_retrieval::{CorpusError, PlannerError};
use std::path::PathBuf;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("retrieval planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("stage graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("knowledge base error: {0}")]
    Corpus(#[from] CorpusError),

    /// The run itself failed; no artifact was produced
    #[error("run failed: {0}")]
    Run(#[from] RunError),
}

impl PipelineError {
    /// Stage that caused a run failure, if any
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Run(err) => err.stage().map(|s| s.as_str()),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Language model failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model returned no content for {0}")]
    Empty(String),

    #[error("model refused: {0}")]
    Refused(String),
}

impl From<ModelError> for ExecutorError {
    fn from(value: ModelError) -> Self {
        Self::Failed(value.to_string())
    }
}

/// Artifact renderer failures
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("nothing to render")]
    EmptyDocument,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("renderer rejected document: {0}")]
    Rejected(String),
}

impl From<RenderError> for ExecutorError {
    fn from(value: RenderError) -> Self {
        Self::Render(value.to_string())
    }
}
