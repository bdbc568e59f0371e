//! In-memory knowledge base
//!
//! Deterministic token-overlap ranking over a fixed set of passages. Stands in
//! for the vector store when running offline.

use crate::client::{RetrievalBackend, RetrievalQuery};
use crate::error::{BackendError, CorpusError};
use std::collections::BTreeSet;
use std::path::Path;

/// Collection name used by the framework knowledge base
pub const DEFAULT_COLLECTION: &str = "uae-inspection-framework";

const STOPWORDS: &[&str] = &[
    "and", "are", "but", "for", "from", "has", "have", "its", "not", "of", "that", "the", "their",
    "them", "they", "this", "was", "were", "with",
];

/// A short excerpt per standard so offline runs cite something meaningful
const FRAMEWORK_PASSAGES: &[&str] = &[
    "Standard 1 Students' achievement: inspectors judge attainment against curriculum standards, progress over time, and learning skills such as independence, collaboration and critical thinking.",
    "Standard 2 Students' personal and social development: behaviour, attitudes, attendance and punctuality, understanding of Islamic values and Emirati heritage, social responsibility and innovation skills.",
    "Standard 3 Teaching and assessment: teachers' subject knowledge, lesson planning, questioning, differentiation to meet the needs of groups of students, and the use of assessment information and feedback to improve learning.",
    "Standard 4 Curriculum: design and implementation, breadth and balance, continuity and progression, cross-curricular links, enrichment and adaptation of the curriculum to meet students' needs.",
    "Standard 5 The protection, care, guidance and support of students: child protection and safeguarding, health and safety, wellbeing, support for students with special educational needs and guidance on careers.",
    "Standard 6 Leadership and management: effectiveness of leadership, self-evaluation and improvement planning, partnerships with parents and the community, governance, and management of staffing, facilities and resources.",
];

/// Keyword-ranked passage store serving one named collection
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    collection: String,
    passages: Vec<Passage>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

#[derive(Debug, Clone)]
struct Passage {
    text: String,
    tokens: BTreeSet<String>,
}

impl InMemoryBackend {
    pub fn new<S: Into<String>>(passages: impl IntoIterator<Item = S>) -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            passages: passages
                .into_iter()
                .map(|p| {
                    let text = p.into();
                    let tokens = tokenize(&text);
                    Passage { text, tokens }
                })
                .collect(),
        }
    }

    /// Built-in excerpts of the six performance standards
    #[must_use]
    pub fn framework_defaults() -> Self {
        Self::new(FRAMEWORK_PASSAGES.iter().copied())
    }

    /// Load every passage under `dir`.
    ///
    /// # Errors
    /// See [`load_corpus`].
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CorpusError> {
        Ok(Self::new(load_corpus(dir)?))
    }

    /// Serve the passages under another collection name.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passages ranked by distinct shared tokens; ties keep corpus order.
    #[must_use]
    pub fn rank(&self, query: &str, top_k: usize) -> Vec<String> {
        let wanted = tokenize(query);
        let mut scored: Vec<(usize, usize)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.tokens.intersection(&wanted).count(), i))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, i)| self.passages[i].text.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl RetrievalBackend for InMemoryBackend {
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        if query.text.trim().is_empty() {
            return Err(BackendError::Rejected("empty query".to_string()));
        }
        if let Some(collection) = query.collection.as_deref() {
            if collection != self.collection {
                return Err(BackendError::Rejected(format!("unknown collection `{collection}`")));
            }
        }
        tracing::debug!(collection = %self.collection, top_k = query.top_k, "searching passages");
        Ok(self.rank(&query.text, query.top_k))
    }
}

/// Read `.md` and `.txt` files under `dir` (sorted by name) and split them into
/// passages on blank lines.
///
/// # Errors
/// `CorpusError::Io` on unreadable paths, `CorpusError::Empty` when nothing was found.
pub fn load_corpus(dir: impl AsRef<Path>) -> Result<Vec<String>, CorpusError> {
    let dir = dir.as_ref();
    let io_err = |source| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
        if path.is_file() && is_text {
            files.push(path);
        }
    }
    files.sort();

    let mut passages = Vec::new();
    for path in &files {
        let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        passages.extend(split_passages(&content));
    }

    tracing::info!(dir = %dir.display(), files = files.len(), passages = passages.len(), "corpus loaded");
    if passages.is_empty() {
        return Err(CorpusError::Empty(dir.to_path_buf()));
    }
    Ok(passages)
}

fn split_passages(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_overlap() {
        let kb = InMemoryBackend::framework_defaults();
        let hits = kb.rank("Safeguarding and child protection procedures", 2);
        assert!(hits[0].starts_with("Standard 5"));
        assert!(hits.len() <= 2);
    }

    #[test]
    fn no_overlap_returns_nothing() {
        let kb = InMemoryBackend::new(["alpha beta gamma"]);
        assert!(kb.rank("zzz", 5).is_empty());
    }

    #[test]
    fn splits_on_blank_lines() {
        let passages = split_passages("one\ntwo\n\n\nthree\n");
        assert_eq!(passages, vec!["one two".to_string(), "three".to_string()]);
    }

    #[tokio::test]
    async fn rejects_empty_query() {
        let kb = InMemoryBackend::framework_defaults();
        assert!(kb.search(&RetrievalQuery::new("  ", 3)).await.is_err());
    }

    #[tokio::test]
    async fn serves_only_its_own_collection() {
        let kb = InMemoryBackend::framework_defaults().with_collection("inspection-2026");
        assert_eq!(kb.collection(), "inspection-2026");

        let query = RetrievalQuery::new("lesson planning and assessment", 2);
        let hits = kb.search(&query.clone().in_collection("inspection-2026")).await.unwrap();
        assert!(!hits.is_empty());

        let err = kb
            .search(&query.clone().in_collection(DEFAULT_COLLECTION))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(msg) if msg.contains(DEFAULT_COLLECTION)));

        // unaddressed queries go to whatever the backend serves
        assert!(kb.search(&query).await.is_ok());
    }
}
