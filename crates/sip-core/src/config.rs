//! Pipeline configuration
//!
//! Loaded from TOML, then overridden by `SIP_*` environment variables.
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [engine]
//! run_timeout_secs = 600
//!
//! [retrieval]
//! max_queries = 3
//! top_k = 5
//! timeout_ms = 10000
//!
//! [render]
//! output_dir = "output_reports"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sip_kernel::engine::EngineConfig;
use sip_kernel::retry::RetryPolicy;
use sip_kernel::StageKind;
use sip_retrieval::{ClientConfig, DEFAULT_COLLECTION, DEFAULT_MAX_QUERIES, DEFAULT_TOP_K};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineSection,
    pub retrieval: RetrievalSection,
    pub refine: RefineSection,
    pub render: RenderSection,
    pub knowledge_base: KnowledgeBaseSection,
}

/// Scheduling limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub run_timeout_secs: u64,
    pub grace_period_secs: u64,
    /// Unbounded when absent
    pub max_parallel_stages: Option<usize>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            run_timeout_secs: 600,
            grace_period_secs: 5,
            max_parallel_stages: None,
        }
    }
}

/// Knowledge base lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// Upper bound on backend calls per evaluation (K)
    pub max_queries: usize,
    pub top_k: usize,
    pub timeout_ms: u64,
    /// Defaults to `max_queries`
    pub concurrency: Option<usize>,
    pub retries_on_timeout: u32,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            max_queries: DEFAULT_MAX_QUERIES,
            top_k: DEFAULT_TOP_K,
            timeout_ms: 10_000,
            concurrency: None,
            retries_on_timeout: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineSection {
    pub max_rounds: u32,
}

impl Default for RefineSection {
    fn default() -> Self {
        Self { max_rounds: 1 }
    }
}

/// Artifact output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub output_dir: PathBuf,
    /// Render failures are fatal on the first attempt unless enabled
    pub retry_on_failure: bool,
    /// Total attempts when retries are enabled
    pub max_attempts: u32,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output_reports"),
            retry_on_failure: false,
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseSection {
    /// Collection every retrieval query targets
    pub collection: String,
    /// Directory of `.md`/`.txt` passages; built-in excerpts when absent
    pub corpus_dir: Option<PathBuf>,
}

impl Default for KnowledgeBaseSection {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            corpus_dir: None,
        }
    }
}

impl PipelineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text.
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed input.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file, apply environment overrides, and validate.
    ///
    /// # Errors
    /// Any [`ConfigError`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply `SIP_*` overrides from the process environment.
    ///
    /// # Errors
    /// `ConfigError::InvalidEnv` when a numeric variable does not parse.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// # Errors
    /// `ConfigError::InvalidEnv` when a numeric variable does not parse.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("SIP_OUTPUT_DIR") {
            self.render.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SIP_CORPUS_DIR") {
            self.knowledge_base.corpus_dir = Some(PathBuf::from(dir));
        }
        if let Some(k) = parse_var(&lookup, "SIP_MAX_QUERIES")? {
            self.retrieval.max_queries = k;
        }
        if let Some(top_k) = parse_var(&lookup, "SIP_TOP_K")? {
            self.retrieval.top_k = top_k;
        }
        if let Some(secs) = parse_var(&lookup, "SIP_RUN_TIMEOUT_SECS")? {
            self.engine.run_timeout_secs = secs;
        }
        Ok(())
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.retrieval.max_queries == 0 {
            return invalid("retrieval.max_queries must be at least 1");
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1");
        }
        if self.retrieval.concurrency == Some(0) {
            return invalid("retrieval.concurrency must be at least 1");
        }
        if self.retrieval.timeout_ms == 0 {
            return invalid("retrieval.timeout_ms must be positive");
        }
        if self.engine.run_timeout_secs == 0 {
            return invalid("engine.run_timeout_secs must be positive");
        }
        if self.engine.max_parallel_stages == Some(0) {
            return invalid("engine.max_parallel_stages must be at least 1");
        }
        if self.retrieval_timeout() >= self.run_timeout() {
            return invalid("retrieval.timeout_ms must be shorter than engine.run_timeout_secs");
        }
        if self.knowledge_base.collection.trim().is_empty() {
            return invalid("knowledge_base.collection must not be empty");
        }
        if self.refine.max_rounds == 0 {
            return invalid("refine.max_rounds must be at least 1");
        }
        if self.render.retry_on_failure && self.render.max_attempts < 2 {
            return invalid("render.max_attempts must be at least 2 when retries are enabled");
        }
        Ok(())
    }

    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.run_timeout_secs)
    }

    #[must_use]
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.timeout_ms)
    }

    /// Engine settings, including the render retry policy.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_run_timeout(self.run_timeout())
            .with_grace_period(Duration::from_secs(self.engine.grace_period_secs));
        if let Some(limit) = self.engine.max_parallel_stages {
            config = config.with_max_parallel_stages(limit);
        }
        if self.render.retry_on_failure {
            config = config.with_retry(
                StageKind::Render,
                RetryPolicy::retries(self.render.max_attempts.saturating_sub(1)),
            );
        }
        config
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.retrieval_timeout(),
            concurrency: self.retrieval.concurrency.unwrap_or(self.retrieval.max_queries),
            retries_on_timeout: self.retrieval.retries_on_timeout,
            collection: self.knowledge_base.collection.clone(),
        }
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.render.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_max_queries(mut self, k: usize) -> Self {
        self.retrieval.max_queries = k;
        self
    }

    #[must_use]
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.refine.max_rounds = rounds;
        self
    }

    #[must_use]
    pub fn with_corpus_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.knowledge_base.corpus_dir = Some(dir.into());
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            })
        })
        .transpose()
}
