//! SIP Kernel (sip-kernel)
//!
//! Two-phase stage orchestration over a write-once blackboard:
//! 1. **Construction Phase**: declare stages by their read/write sets and
//!    validate the derived dependency graph
//! 2. **Execution Phase**: run the validated graph with dependency-aware
//!    parallelism, skip policies and fail-fast cancellation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sip_kernel::prelude::*;
//!
//! // Construction phase
//! let mut builder = StageGraphBuilder::new(GraphType::Production);
//! builder.add_stage(StageSpec::new("a", StageKind::Tool).reads(["in"]).writes(["x"]), exec_a)?;
//! builder.add_stage(StageSpec::new("b", StageKind::Tool).reads(["x"]).writes(["y"]), exec_b)?;
//! let graph = builder.build()?;
//!
//! // Execution phase
//! let engine = PipelineEngine::new(EngineConfig::default());
//! let run = engine.run(&graph, [("in".into(), "hello".into())]).await;
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod retry;
pub mod stage;
pub mod state;
pub mod status;
pub mod types;

// Re-exports
pub use error::*;
pub use types::*;

/// Common imports for building and running graphs
pub mod prelude {
    pub use crate::engine::{EngineConfig, PipelineEngine, Run, StageRecord};
    pub use crate::error::{ExecutorError, GraphError, RunError, StateError};
    pub use crate::events::{RunEvent, RunEventKind};
    pub use crate::graph::{StageGraph, StageGraphBuilder};
    pub use crate::retry::RetryPolicy;
    pub use crate::stage::{
        input_text, single_output, SkipPolicy, Stage, StageExecutor, StageInputs, StageOutputs,
        StageSpec, ToolExecutor,
    };
    pub use crate::state::StateStore;
    pub use crate::types::{
        FieldKey, FieldValue, GraphType, RunId, RunStatus, StageId, StageKind, StageStatus,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether illegal status transitions panic instead of being logged
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
