//! Error types for retrieval
//!
//! [`RetrievalError`] is data, not control flow: the client folds it into a
//! [`RetrievalResult`](crate::client::RetrievalResult) and never returns it as `Err`.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Why a retrieval group came back without snippets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalError {
    #[error("retrieval timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("retrieval backend error: {message}")]
    Backend { message: String },
}

impl RetrievalError {
    /// Only timeouts are worth another attempt.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Transport or server failure reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected query: {0}")]
    Rejected(String),
}

/// Planner misconfiguration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    #[error("max_queries must be at least 1")]
    ZeroQueries,

    #[error("top_k must be at least 1")]
    ZeroTopK,
}

/// Failure loading a knowledge base corpus
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read corpus at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus at {0} contains no passages")]
    Empty(PathBuf),
}
