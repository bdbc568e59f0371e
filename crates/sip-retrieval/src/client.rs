//! Retrieval client
//!
//! Wraps a [`RetrievalBackend`] with a per-call timeout, a retry on timeout
//! and a counting semaphore shared by every call made through one client.
//! Failures never escape as `Err`: they come back as [`RetrievalResult::Error`]
//! so the caller can degrade instead of failing the run.

use crate::error::{BackendError, RetrievalError};
use crate::memory::DEFAULT_COLLECTION;
use crate::planner::{GroupId, QueryPlan, DEFAULT_MAX_QUERIES};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sip_kernel::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A request to the knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    pub top_k: usize,
    /// Target collection; set by the client when the query is sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            collection: None,
        }
    }

    #[must_use]
    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// Ordered snippets, or the reason there are none
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalResult {
    Snippets(Vec<String>),
    Error(RetrievalError),
}

impl RetrievalResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Snippets, empty on error
    #[must_use]
    pub fn snippets(&self) -> &[String] {
        match self {
            Self::Snippets(s) => s,
            Self::Error(_) => &[],
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&RetrievalError> {
        match self {
            Self::Error(e) => Some(e),
            Self::Snippets(_) => None,
        }
    }
}

/// Similarity search over the framework knowledge base
#[async_trait::async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Up to `query.top_k` snippets, best match first.
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<String>, BackendError>;
}

/// Client limits and target collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for a single backend call
    pub timeout: Duration,
    /// Calls allowed in flight at once
    pub concurrency: usize,
    /// Extra attempts after a timed-out call
    pub retries_on_timeout: u32,
    /// Knowledge-base collection every query is sent to
    pub collection: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            concurrency: DEFAULT_MAX_QUERIES,
            retries_on_timeout: 1,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// Result for one planned group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupResult {
    pub group: GroupId,
    pub result: RetrievalResult,
    pub attempts: u32,
}

/// Concurrency-limited, never-failing retrieval front end
#[derive(Clone)]
pub struct RetrievalClient {
    backend: Arc<dyn RetrievalBackend>,
    limiter: Arc<Semaphore>,
    config: ClientConfig,
}

impl std::fmt::Debug for RetrievalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalClient")
            .field("config", &self.config)
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl RetrievalClient {
    #[must_use]
    pub fn new(backend: Arc<dyn RetrievalBackend>, config: ClientConfig) -> Self {
        Self {
            backend,
            limiter: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one query.
    pub async fn query(&self, query: &RetrievalQuery) -> RetrievalResult {
        self.query_counted(query).await.0
    }

    async fn query_counted(&self, query: &RetrievalQuery) -> (RetrievalResult, u32) {
        let Ok(_permit) = self.limiter.acquire().await else {
            return (
                RetrievalResult::Error(RetrievalError::Backend {
                    message: "retrieval limiter closed".to_string(),
                }),
                0,
            );
        };

        let query = query.clone().in_collection(&self.config.collection);
        let policy = RetryPolicy::retries(self.config.retries_on_timeout);
        let (outcome, attempts) = policy
            .run(|| self.attempt(&query), RetrievalError::is_retryable)
            .await;

        match outcome {
            Ok(snippets) => (RetrievalResult::Snippets(snippets), attempts),
            Err(err) => {
                tracing::warn!(error = %err, attempts, "retrieval degraded");
                (RetrievalResult::Error(err), attempts)
            }
        }
    }

    async fn attempt(&self, query: &RetrievalQuery) -> Result<Vec<String>, RetrievalError> {
        let after = self.config.timeout;
        match tokio::time::timeout(after, self.backend.search(query)).await {
            Ok(Ok(mut snippets)) => {
                snippets.truncate(query.top_k);
                Ok(snippets)
            }
            Ok(Err(err)) => Err(RetrievalError::Backend {
                message: err.to_string(),
            }),
            Err(_) => Err(RetrievalError::Timeout { after }),
        }
    }

    /// Run every query in `plan` concurrently, bounded by the limiter.
    ///
    /// Results come back in plan order, each tagged with its group id.
    pub async fn query_all(&self, plan: &QueryPlan) -> Vec<GroupResult> {
        let calls = plan.groups().iter().map(|group| async move {
            let (result, attempts) = self.query_counted(&group.query).await;
            tracing::debug!(
                group = %group.id,
                category = %group.category,
                attempts,
                error = result.is_error(),
                "retrieval group finished"
            );
            GroupResult {
                group: group.id,
                result,
                attempts,
            }
        });
        join_all(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<String>);

    #[async_trait::async_trait]
    impl RetrievalBackend for Fixed {
        async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait::async_trait]
    impl RetrievalBackend for Down {
        async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
            Err(BackendError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn truncates_to_top_k() {
        let backend = Fixed((0..10).map(|i| format!("s{i}")).collect());
        let client = RetrievalClient::new(Arc::new(backend), ClientConfig::default());
        let result = client.query(&RetrievalQuery::new("q", 2)).await;
        assert_eq!(result.snippets(), ["s0".to_string(), "s1".to_string()]);
    }

    #[tokio::test]
    async fn backend_error_is_data_and_not_retried() {
        let client = RetrievalClient::new(Arc::new(Down), ClientConfig::default());
        let (result, attempts) = client.query_counted(&RetrievalQuery::new("q", 5)).await;
        assert!(matches!(result.error(), Some(RetrievalError::Backend { .. })));
        assert_eq!(attempts, 1);
        assert!(result.snippets().is_empty());
    }
}
