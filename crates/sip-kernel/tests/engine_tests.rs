use pretty_assertions::assert_eq;
use sip_kernel::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sleeps, then writes a fixed value; tracks peak concurrency across clones.
#[derive(Clone, Default)]
struct Gauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct Delayed {
    gauge: Gauge,
    delay: Duration,
    output: &'static str,
}

#[async_trait::async_trait]
impl StageExecutor for Delayed {
    async fn execute(&self, inputs: StageInputs) -> Result<StageOutputs, ExecutorError> {
        let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);

        let joined: Vec<String> = inputs.values().map(FieldValue::to_text).collect();
        Ok(single_output(self.output, format!("{}({})", self.output, joined.join(","))))
    }
}

fn delayed(gauge: &Gauge, delay_ms: u64, output: &'static str) -> Arc<dyn StageExecutor> {
    Arc::new(Delayed {
        gauge: gauge.clone(),
        delay: Duration::from_millis(delay_ms),
        output,
    })
}

fn failing(message: &'static str) -> Arc<dyn StageExecutor> {
    ToolExecutor::shared(move |_: &StageInputs| Err(ExecutorError::failed(message)))
}

fn tool(id: &str, reads: &[&str], writes: &[&str]) -> StageSpec {
    StageSpec::new(id, StageKind::Tool)
        .reads(reads.iter().copied())
        .writes(writes.iter().copied())
}

fn input(key: &str, value: &str) -> (FieldKey, FieldValue) {
    (FieldKey::from(key), FieldValue::text(value))
}

#[tokio::test(start_paused = true)]
async fn independent_stages_run_concurrently() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("a", &["in"], &["x"]), delayed(&gauge, 100, "x")).unwrap();
    b.add_stage(tool("b", &["in"], &["y"]), delayed(&gauge, 100, "y")).unwrap();
    b.add_stage(tool("c", &["in"], &["z"]), delayed(&gauge, 100, "z")).unwrap();
    b.add_stage(tool("join", &["x", "y", "z"], &["out"]), delayed(&gauge, 10, "out"))
        .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, [input("in", "v")]).await;

    assert!(run.is_completed(), "{:?}", run.failure());
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    assert_eq!(
        run.output("out").map(FieldValue::to_text).as_deref(),
        Some("out(x(v),y(v),z(v))")
    );
    let order: Vec<&str> = run.trace().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order.last(), Some(&"join"));
}

#[tokio::test(start_paused = true)]
async fn parallel_limit_is_respected() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    for (id, out) in [("a", "x"), ("b", "y"), ("c", "z")] {
        b.add_stage(tool(id, &["in"], &[out]), delayed(&gauge, 50, out)).unwrap();
    }
    let graph = b.build().unwrap();

    let engine = PipelineEngine::new(EngineConfig::default().with_max_parallel_stages(1));
    let run = engine.run(&graph, [input("in", "v")]).await;

    assert!(run.is_completed());
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_optional_input_skips_with_sentinel() {
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        StageSpec::new("video", StageKind::Model)
            .optional_reads(["video_uri"])
            .writes(["video_summary"])
            .skip_when_empty("No video evidence provided."),
        failing("must not be called"),
    )
    .unwrap();
    b.add_stage(
        tool("echo", &["video_summary"], &["out"]),
        ToolExecutor::shared(|inputs: &StageInputs| {
            Ok(single_output("out", input_text(inputs, "video_summary")))
        }),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, Vec::new()).await;

    assert!(run.is_completed(), "{:?}", run.failure());
    assert_eq!(run.stage_status("video"), Some(StageStatus::Skipped));
    assert_eq!(
        run.output("out"),
        Some(&FieldValue::text("No video evidence provided."))
    );
    assert_eq!(run.stage(&"video".into()).map(|r| r.attempts), Some(0));
}

#[tokio::test]
async fn supplied_optional_input_runs_the_stage() {
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        StageSpec::new("video", StageKind::Model)
            .optional_reads(["video_uri"])
            .writes(["video_summary"])
            .skip_when_empty("No video evidence provided."),
        ToolExecutor::shared(|_: &StageInputs| Ok(single_output("video_summary", "analysed"))),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default()
        .run(&graph, [input("video_uri", "gs://clip.mp4")])
        .await;

    assert_eq!(run.stage_status("video"), Some(StageStatus::Completed));
    assert_eq!(run.output("video_summary"), Some(&FieldValue::text("analysed")));
}

#[tokio::test]
async fn missing_required_input_starts_nothing() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        tool("a", &["text"], &["x"]),
        ToolExecutor::shared(move |_: &StageInputs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(single_output("x", "done"))
        }),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, Vec::new()).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(
        run.failure(),
        Some(&RunError::MissingField { field: "text".into() })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(run.stage_status("a"), Some(StageStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn first_failure_cancels_pending_and_discards_outputs() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("bad", &["in"], &["x"]), failing("model unavailable")).unwrap();
    b.add_stage(tool("slow", &["in"], &["y"]), delayed(&gauge, 1_000, "y")).unwrap();
    b.add_stage(tool("after", &["x", "y"], &["z"]), delayed(&gauge, 10, "z")).unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, [input("in", "v")]).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(
        run.failure(),
        Some(&RunError::StageFailed {
            stage: "bad".into(),
            cause: ExecutorError::failed("model unavailable"),
        })
    );
    assert_eq!(run.stage_status("bad"), Some(StageStatus::Failed));
    assert_eq!(run.stage_status("slow"), Some(StageStatus::Completed));
    assert_eq!(run.stage_status("after"), Some(StageStatus::Cancelled));
    assert!(run.outputs().is_empty());
    assert!(run.trace().all(|(_, r)| r.outputs.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn in_flight_stage_past_grace_is_cancelled() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("bad", &["in"], &["x"]), failing("boom")).unwrap();
    b.add_stage(tool("stuck", &["in"], &["y"]), delayed(&gauge, 60_000, "y")).unwrap();
    let graph = b.build().unwrap();

    let engine =
        PipelineEngine::new(EngineConfig::default().with_grace_period(Duration::from_secs(1)));
    let run = engine.run(&graph, [input("in", "v")]).await;

    assert_eq!(run.failure().and_then(RunError::stage), Some(&StageId::from("bad")));
    assert_eq!(run.stage_status("stuck"), Some(StageStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn grace_period_never_outlives_the_run_deadline() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("bad", &["in"], &["x"]), failing("boom")).unwrap();
    b.add_stage(tool("stuck", &["in"], &["y"]), delayed(&gauge, 60_000, "y")).unwrap();
    let graph = b.build().unwrap();

    let engine = PipelineEngine::new(
        EngineConfig::default()
            .with_grace_period(Duration::from_secs(30))
            .with_run_timeout(Duration::from_secs(2)),
    );
    let started = tokio::time::Instant::now();
    let run = engine.run(&graph, [input("in", "v")]).await;

    assert!(started.elapsed() <= Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(run.failure().and_then(RunError::stage), Some(&StageId::from("bad")));
    assert_eq!(run.stage_status("stuck"), Some(StageStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn input_for_produced_field_is_rejected_before_any_stage_starts() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("a", &["in"], &["x"]), delayed(&gauge, 100, "x")).unwrap();
    b.add_stage(tool("b", &["x"], &["y"]), delayed(&gauge, 10, "y")).unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default()
        .run(&graph, [input("in", "v"), input("x", "caller")])
        .await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(
        run.failure(),
        Some(&RunError::InputConflict {
            field: "x".into(),
            stage: "a".into(),
        })
    );
    assert_eq!(run.stage_status("a"), Some(StageStatus::Cancelled));
    assert_eq!(run.stage_status("b"), Some(StageStatus::Cancelled));
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 0);
    assert!(run.outputs().is_empty());
}

#[tokio::test]
async fn sandbox_cycle_is_reported_unschedulable() {
    let mut b = StageGraphBuilder::new(GraphType::Sandbox);
    b.add_stage(tool("a", &["y"], &["x"]), failing("unreachable")).unwrap();
    b.add_stage(tool("b", &["x"], &["y"]), failing("unreachable")).unwrap();
    b.add_stage(
        tool("free", &[], &["z"]),
        ToolExecutor::shared(|_: &StageInputs| Ok(single_output("z", "ok"))),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, Vec::new()).await;

    assert_eq!(
        run.failure(),
        Some(&RunError::Unschedulable {
            pending: vec!["a".into(), "b".into()],
        })
    );
    assert_eq!(run.stage_status("free"), Some(StageStatus::Completed));
    assert_eq!(run.stage_status("a"), Some(StageStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn run_deadline_aborts_everything() {
    let gauge = Gauge::default();
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(tool("slow", &["in"], &["x"]), delayed(&gauge, 600_000, "x")).unwrap();
    b.add_stage(tool("next", &["x"], &["y"]), delayed(&gauge, 10, "y")).unwrap();
    let graph = b.build().unwrap();

    let engine =
        PipelineEngine::new(EngineConfig::default().with_run_timeout(Duration::from_secs(1)));
    let run = engine.run(&graph, [input("in", "v")]).await;

    assert_eq!(
        run.failure(),
        Some(&RunError::Timeout {
            after: Duration::from_secs(1)
        })
    );
    assert_eq!(run.stage_status("slow"), Some(StageStatus::Cancelled));
    assert_eq!(run.stage_status("next"), Some(StageStatus::Cancelled));
}

#[tokio::test]
async fn retry_policy_reinvokes_by_kind() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = ToolExecutor::shared(move |_: &StageInputs| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ExecutorError::failed("transient"))
        } else {
            Ok(single_output("x", "ok"))
        }
    });
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        StageSpec::new("m", StageKind::Model).reads(["in"]).writes(["x"]),
        flaky,
    )
    .unwrap();
    let graph = b.build().unwrap();

    let engine = PipelineEngine::new(
        EngineConfig::default().with_retry(StageKind::Model, RetryPolicy::retries(1)),
    );
    let run = engine.run(&graph, [input("in", "v")]).await;

    assert!(run.is_completed());
    assert_eq!(run.stage(&"m".into()).map(|r| r.attempts), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn render_failure_is_fatal_without_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        StageSpec::new("render", StageKind::Render).reads(["text"]).writes(["path"]),
        ToolExecutor::shared(move |_: &StageInputs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::Render("disk full".into()))
        }),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, [input("text", "report")]).await;

    assert_eq!(
        run.failure(),
        Some(&RunError::RenderFailed {
            stage: "render".into(),
            message: "disk full".into(),
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn undeclared_output_fails_the_stage() {
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        tool("a", &["in"], &["x"]),
        ToolExecutor::shared(|_: &StageInputs| Ok(single_output("rogue", "?"))),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, [input("in", "v")]).await;

    assert!(matches!(
        run.failure(),
        Some(RunError::StageFailed {
            cause: ExecutorError::UndeclaredOutput(_),
            ..
        })
    ));
}

#[tokio::test]
async fn panicking_executor_is_a_stage_failure() {
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        tool("a", &["in"], &["x"]),
        ToolExecutor::shared(|_: &StageInputs| -> Result<StageOutputs, ExecutorError> {
            panic!("executor bug")
        }),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let run = PipelineEngine::default().run(&graph, [input("in", "v")]).await;

    assert!(matches!(
        run.failure(),
        Some(RunError::StageFailed {
            cause: ExecutorError::Panicked(_),
            ..
        })
    ));
    assert_eq!(run.stage_status("a"), Some(StageStatus::Failed));
}

#[tokio::test]
async fn event_sink_sees_stage_outputs_as_they_land() {
    let mut b = StageGraphBuilder::new(GraphType::Production);
    b.add_stage(
        tool("a", &["in"], &["x"]),
        ToolExecutor::shared(|_: &StageInputs| Ok(single_output("x", "first"))),
    )
    .unwrap();
    b.add_stage(
        tool("b", &["x"], &["y"]),
        ToolExecutor::shared(|_: &StageInputs| Ok(single_output("y", "second"))),
    )
    .unwrap();
    let graph = b.build().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = PipelineEngine::default().with_event_sink(tx);
    let run = engine.run(&graph, [input("in", "v")]).await;
    drop(engine);

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        assert_eq!(event.run_id, run.id());
        kinds.push(event.kind);
    }

    assert_eq!(kinds.first(), Some(&RunEventKind::RunStarted));
    assert_eq!(
        kinds.last(),
        Some(&RunEventKind::RunFinished {
            status: RunStatus::Completed
        })
    );
    let completed: Vec<&StageId> = kinds
        .iter()
        .filter_map(|k| match k {
            RunEventKind::StageCompleted { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![&StageId::from("a"), &StageId::from("b")]);
    assert_eq!(run.events().len(), kinds.len());
}
