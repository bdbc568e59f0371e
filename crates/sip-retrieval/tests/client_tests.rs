use pretty_assertions::assert_eq;
use sip_retrieval::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Never answers
struct Hanging {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl RetrievalBackend for Hanging {
    async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }
}

/// Answers after a delay, tracking peak concurrency
#[derive(Default)]
struct Slow {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait::async_trait]
impl RetrievalBackend for Slow {
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<String>, BackendError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![format!("about {}", query.text)])
    }
}

fn findings_in(categories: &[Category]) -> Vec<Finding> {
    categories
        .iter()
        .map(|c| Finding::new(format!("observation on {}", c.label())).with_category(*c))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_yields_timeout_result_after_one_retry() {
    let backend = Arc::new(Hanging {
        calls: AtomicU32::new(0),
    });
    let config = ClientConfig {
        timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    let client = RetrievalClient::new(backend.clone(), config);

    let result = client.query(&RetrievalQuery::new("teaching quality", 5)).await;

    assert_eq!(
        result,
        RetrievalResult::Error(RetrievalError::Timeout {
            after: Duration::from_secs(2)
        })
    );
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_capped_by_limiter() {
    let backend = Arc::new(Slow::default());
    let config = ClientConfig {
        concurrency: 2,
        ..ClientConfig::default()
    };
    let client = RetrievalClient::new(backend.clone(), config);
    let plan = RetrievalGroupingPlanner::new(3, 5).unwrap().plan(&findings_in(&[
        Category::Curriculum,
        Category::StudentsAchievement,
        Category::LeadershipAndManagement,
    ]));
    assert_eq!(plan.len(), 3);

    let results = client.query_all(&plan).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| !r.result.is_error()));
    assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn results_rejoin_their_groups() {
    let client = RetrievalClient::new(Arc::new(Slow::default()), ClientConfig::default());
    let plan = RetrievalGroupingPlanner::default().plan(&findings_in(&[
        Category::Curriculum,
        Category::ProtectionCareGuidance,
    ]));

    let results = client.query_all(&plan).await;

    for result in &results {
        let group = plan.group(result.group).unwrap();
        assert_eq!(
            result.result.snippets(),
            [format!("about {}", group.query.text)]
        );
        assert_eq!(result.attempts, 1);
    }
}

#[tokio::test]
async fn corpus_directory_backs_in_memory_search() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a_teaching.md"),
        "Teaching quality is judged on lesson planning.\n\nAssessment informs next steps.\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("b_safety.txt"), "Safeguarding is effective.\n").unwrap();
    std::fs::write(dir.path().join("ignored.json"), "{}").unwrap();

    let passages = load_corpus(dir.path()).unwrap();
    assert_eq!(passages.len(), 3);

    let client = RetrievalClient::new(
        Arc::new(InMemoryBackend::new(passages)),
        ClientConfig::default(),
    );
    let result = client
        .query(&RetrievalQuery::new("lesson planning quality", 1))
        .await;
    assert_eq!(
        result.snippets(),
        ["Teaching quality is judged on lesson planning.".to_string()]
    );
}

#[test]
fn empty_corpus_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(load_corpus(dir.path()), Err(CorpusError::Empty(_))));
}

#[tokio::test]
async fn queries_are_addressed_to_the_configured_collection() {
    let config = ClientConfig {
        collection: "inspection-2026".to_string(),
        ..ClientConfig::default()
    };
    let matching = RetrievalClient::new(
        Arc::new(InMemoryBackend::framework_defaults().with_collection("inspection-2026")),
        config.clone(),
    );
    let query = RetrievalQuery::new("lesson planning and assessment", 2);
    assert!(!matching.query(&query).await.is_error());

    let elsewhere = RetrievalClient::new(Arc::new(InMemoryBackend::framework_defaults()), config);
    assert!(matches!(
        elsewhere.query(&query).await,
        RetrievalResult::Error(RetrievalError::Backend { message }) if message.contains("inspection-2026")
    ));
}
