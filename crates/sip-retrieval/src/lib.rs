//! SIP Retrieval (sip-retrieval)
//!
//! Grounds findings in the inspection framework with a hard bound on
//! backend calls:
//! - [`RetrievalGroupingPlanner`] folds any number of findings into at most
//!   `K` category-grouped queries
//! - [`RetrievalClient`] runs them concurrently under a semaphore, with a
//!   per-call timeout, and never fails its caller
//!
//! ```rust,ignore
//! use sip_retrieval::prelude::*;
//!
//! let plan = RetrievalGroupingPlanner::default().plan(&findings);
//! let client = RetrievalClient::new(Arc::new(InMemoryBackend::framework_defaults()), ClientConfig::default());
//! let results = client.query_all(&plan).await;
//! ```

pub mod category;
pub mod client;
pub mod error;
pub mod finding;
pub mod memory;
pub mod planner;

pub use category::Category;
pub use client::{
    ClientConfig, GroupResult, RetrievalBackend, RetrievalClient, RetrievalQuery, RetrievalResult,
};
pub use error::{BackendError, CorpusError, PlannerError, RetrievalError};
pub use finding::{Finding, INSUFFICIENT_EVIDENCE};
pub use memory::{load_corpus, InMemoryBackend, DEFAULT_COLLECTION};
pub use planner::{
    GroupId, QueryGroup, QueryPlan, RetrievalGroupingPlanner, DEFAULT_MAX_QUERIES, DEFAULT_TOP_K,
};

/// Common imports
pub mod prelude {
    pub use crate::{
        Category, ClientConfig, Finding, GroupResult, InMemoryBackend, QueryPlan,
        RetrievalBackend, RetrievalClient, RetrievalGroupingPlanner, RetrievalQuery,
        RetrievalResult,
    };
}
