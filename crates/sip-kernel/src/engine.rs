//! Pipeline Engine (execution phase)
//!
//! Runs a [`StageGraph`] that already passed construction. Scheduling
//! decisions (readiness, skip checks, status transitions) happen on the
//! caller's task; only executor calls are spawned, so run metadata is never
//! shared across threads.
//!
//! # Critical Invariants
//!
//! - A stage starts only after every writer of every field it reads has
//!   completed or been skipped.
//! - The first failure cancels all not-yet-started stages, waits for in-flight
//!   ones for at most the grace period, and discards every output. A failed run
//!   never exposes partial results.

use crate::error::{ExecutorError, RunError};
use crate::events::{EventLog, RunEvent, RunEventKind};
use crate::graph::StageGraph;
use crate::retry::RetryPolicy;
use crate::stage::{StageInputs, StageOutputs, StageSpec};
use crate::state::StateStore;
use crate::status::validate_transition;
use crate::types::{FieldKey, FieldValue, RunId, RunStatus, StageId, StageKind, StageStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for the whole run; `None` disables it
    pub run_timeout: Option<Duration>,
    /// How long in-flight stages may finish after a failure
    pub grace_period: Duration,
    /// Worker limit; `None` launches every ready stage
    pub max_parallel_stages: Option<usize>,
    /// Per-kind retry policies; kinds without an entry are not retried
    pub retry: HashMap<StageKind, RetryPolicy>,
}

impl EngineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn without_run_timeout(mut self) -> Self {
        self.run_timeout = None;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    #[must_use]
    pub fn with_max_parallel_stages(mut self, limit: usize) -> Self {
        self.max_parallel_stages = Some(limit.max(1));
        self
    }

    #[must_use]
    pub fn with_retry(mut self, kind: StageKind, policy: RetryPolicy) -> Self {
        self.retry.insert(kind, policy);
        self
    }

    #[must_use]
    pub fn retry_for(&self, kind: StageKind) -> RetryPolicy {
        self.retry.get(&kind).copied().unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout: Some(Duration::from_secs(600)),
            grace_period: Duration::from_secs(5),
            max_parallel_stages: None,
            retry: HashMap::new(),
        }
    }
}

/// What one stage did during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub kind: StageKind,
    pub attempts: u32,
    pub elapsed: Option<Duration>,
    /// Written fields; always empty when the run failed
    pub outputs: StageOutputs,
}

/// Result of one engine invocation
#[derive(Debug, Clone)]
pub struct Run {
    id: RunId,
    status: RunStatus,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    order: Vec<StageId>,
    stages: BTreeMap<StageId, StageRecord>,
    outputs: BTreeMap<FieldKey, FieldValue>,
    failure: Option<RunError>,
    events: Vec<RunEvent>,
}

impl Run {
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The structured failure, if the run failed
    #[must_use]
    pub fn failure(&self) -> Option<&RunError> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn stage(&self, id: &StageId) -> Option<&StageRecord> {
        self.stages.get(id)
    }

    #[must_use]
    pub fn stage_status(&self, id: &str) -> Option<StageStatus> {
        self.stages.get(&StageId::from(id)).map(|r| r.status)
    }

    /// Stage records in dependency order
    pub fn trace(&self) -> impl Iterator<Item = (&StageId, &StageRecord)> {
        self.order
            .iter()
            .filter_map(|id| self.stages.get(id).map(|r| (id, r)))
    }

    /// Final blackboard contents; empty unless the run completed
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<FieldKey, FieldValue> {
        &self.outputs
    }

    #[must_use]
    pub fn output(&self, key: &str) -> Option<&FieldValue> {
        self.outputs.get(&FieldKey::from(key))
    }

    #[must_use]
    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Turn a failed run into its error.
    ///
    /// # Errors
    /// The run's [`RunError`] when it did not complete.
    pub fn into_result(self) -> Result<Self, RunError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Executes validated stage graphs
#[derive(Debug, Default)]
pub struct PipelineEngine {
    config: EngineConfig,
    sink: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl PipelineEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config, sink: None }
    }

    /// Forward run events to `sink` as they happen.
    #[must_use]
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `graph` to completion or failure.
    ///
    /// Never returns early with an error: every failure is carried by the
    /// returned [`Run`], whose per-stage statuses stay inspectable.
    pub async fn run<I>(&self, graph: &StageGraph, inputs: I) -> Run
    where
        I: IntoIterator<Item = (FieldKey, FieldValue)>,
    {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id, stages = graph.len());
        async move {
            let started = Instant::now();
            let started_at = Utc::now();
            let mut exec = Execution::new(run_id, graph, &self.config, self.sink.clone());
            exec.events.append(RunEventKind::RunStarted);
            tracing::info!("run started");

            let result = match exec.seed(inputs) {
                Ok(()) => exec.drive(self.config.run_timeout.map(|t| (started + t, t))).await,
                Err(err) => {
                    exec.cancel_pending();
                    Err(err)
                }
            };
            exec.finish(result, started_at, started.elapsed())
        }
        .instrument(span)
        .await
    }
}

struct StageOutcome {
    idx: usize,
    result: Result<StageOutputs, ExecutorError>,
    attempts: u32,
    elapsed: Duration,
}

type StageFailure = (usize, RunError);

/// Mutable bookkeeping for one run; owned by the scheduling task
struct Execution<'g> {
    run_id: RunId,
    graph: &'g StageGraph,
    config: &'g EngineConfig,
    store: StateStore,
    statuses: Vec<StageStatus>,
    records: Vec<StageRecord>,
    tasks: JoinSet<StageOutcome>,
    in_flight: HashMap<TaskId, usize>,
    events: EventLog,
}

impl<'g> Execution<'g> {
    fn new(
        run_id: RunId,
        graph: &'g StageGraph,
        config: &'g EngineConfig,
        sink: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Self {
        let records = graph
            .stages()
            .map(|s| StageRecord {
                status: StageStatus::Pending,
                kind: s.spec.kind,
                attempts: 0,
                elapsed: None,
                outputs: StageOutputs::new(),
            })
            .collect();
        Self {
            run_id,
            graph,
            config,
            store: StateStore::with_optional(graph.optional_inputs().cloned()),
            statuses: vec![StageStatus::Pending; graph.len()],
            records,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            events: EventLog::new(run_id, sink),
        }
    }

    /// Write invocation inputs and check every required one is present.
    fn seed<I>(&mut self, inputs: I) -> Result<(), RunError>
    where
        I: IntoIterator<Item = (FieldKey, FieldValue)>,
    {
        let writer = StageId::input();
        for (key, value) in inputs {
            if let Some(stage) = self.graph.producer_of(&key) {
                tracing::warn!(field = %key, %stage, "input targets a produced field; no stage started");
                return Err(RunError::InputConflict {
                    field: key,
                    stage: stage.clone(),
                });
            }
            self.store.put(key, value, &writer)?;
        }
        if let Some(field) = self
            .graph
            .required_inputs()
            .iter()
            .find(|f| !self.store.contains(f))
        {
            tracing::warn!(%field, "required input missing; no stage started");
            return Err(RunError::MissingField { field: field.clone() });
        }
        Ok(())
    }

    async fn drive(&mut self, deadline: Option<(Instant, Duration)>) -> Result<(), RunError> {
        let cutoff = deadline.map(|(at, _)| at);
        loop {
            if let Err((idx, err)) = self.launch_ready() {
                return Err(self.fail_fast(idx, err, cutoff).await);
            }

            if self.tasks.is_empty() {
                if self.statuses.iter().all(|s| s.is_terminal()) {
                    return Ok(());
                }
                let pending = self.ids_with(StageStatus::Pending);
                tracing::error!(?pending, "no stage ready and none running");
                self.cancel_pending();
                return Err(RunError::Unschedulable { pending });
            }

            let joined = match deadline {
                Some((at, after)) => {
                    match tokio::time::timeout_at(at, self.tasks.join_next_with_id()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            tracing::error!(?after, "run deadline exceeded");
                            self.abort_in_flight();
                            self.cancel_pending();
                            return Err(RunError::Timeout { after });
                        }
                    }
                }
                None => self.tasks.join_next_with_id().await,
            };

            if let Some(joined) = joined {
                if let Err((idx, err)) = self.settle(joined) {
                    return Err(self.fail_fast(idx, err, cutoff).await);
                }
            }
        }
    }

    /// Start every ready pending stage; skip those whose policy applies.
    ///
    /// Skips make fields present, which can ready more stages, so the scan
    /// repeats until a pass skips nothing.
    fn launch_ready(&mut self) -> Result<(), StageFailure> {
        let graph = self.graph;
        loop {
            let mut skipped_any = false;
            for &idx in graph.order_indices() {
                if self.statuses[idx] != StageStatus::Pending || !self.is_ready(idx) {
                    continue;
                }
                let spec = &graph.stage_at(idx).spec;
                let inputs = self
                    .gather_inputs(spec)
                    .map_err(|e| (idx, RunError::from_stage(spec.id.clone(), e)))?;

                if let Some(sentinel) = spec.skip_sentinel(&inputs) {
                    self.skip(idx, sentinel.clone())?;
                    skipped_any = true;
                    continue;
                }
                if self.at_capacity() {
                    continue;
                }
                self.spawn(idx, inputs);
            }
            if !skipped_any {
                return Ok(());
            }
        }
    }

    fn is_ready(&self, idx: usize) -> bool {
        self.graph
            .stage_at(idx)
            .spec
            .all_reads()
            .all(|field| self.graph.producer_of(field).is_none() || self.store.contains(field))
    }

    fn gather_inputs(&self, spec: &StageSpec) -> Result<StageInputs, ExecutorError> {
        let mut inputs = StageInputs::new();
        for field in &spec.reads {
            let value = self
                .store
                .get_required(field)
                .map_err(|_| ExecutorError::MissingInput(field.clone()))?;
            inputs.insert(field.clone(), value);
        }
        for field in &spec.optional_reads {
            let value = self.store.get(field).unwrap_or_else(FieldValue::empty);
            inputs.insert(field.clone(), value);
        }
        Ok(inputs)
    }

    fn at_capacity(&self) -> bool {
        self.config
            .max_parallel_stages
            .is_some_and(|limit| self.tasks.len() >= limit)
    }

    fn skip(&mut self, idx: usize, sentinel: FieldValue) -> Result<(), StageFailure> {
        let graph = self.graph;
        let spec = &graph.stage_at(idx).spec;
        let mut outputs = StageOutputs::new();
        for field in &spec.writes {
            self.store
                .put(field.clone(), sentinel.clone(), &spec.id)
                .map_err(|e| (idx, RunError::from(e)))?;
            outputs.insert(field.clone(), sentinel.clone());
        }
        self.records[idx].outputs = outputs;
        self.transition(idx, StageStatus::Skipped);
        self.events
            .append(RunEventKind::StageSkipped { stage: spec.id.clone() });
        tracing::info!(stage = %spec.id, "stage skipped; optional inputs empty");
        Ok(())
    }

    fn spawn(&mut self, idx: usize, inputs: StageInputs) {
        let graph = self.graph;
        let stage = graph.stage_at(idx);
        let executor = Arc::clone(&stage.executor);
        let retry = self.config.retry_for(stage.spec.kind);
        let span = tracing::info_span!("stage", stage = %stage.spec.id, kind = ?stage.spec.kind);

        let handle = self.tasks.spawn(
            async move {
                let started = Instant::now();
                let (result, attempts) = retry
                    .run(
                        || {
                            let executor = Arc::clone(&executor);
                            let inputs = inputs.clone();
                            async move { executor.execute(inputs).await }
                        },
                        ExecutorError::is_retryable,
                    )
                    .await;
                StageOutcome {
                    idx,
                    result,
                    attempts,
                    elapsed: started.elapsed(),
                }
            }
            .instrument(span),
        );
        self.in_flight.insert(handle.id(), idx);
        self.transition(idx, StageStatus::Running);
        self.events.append(RunEventKind::StageStarted {
            stage: stage.spec.id.clone(),
        });
        tracing::debug!(stage = %stage.spec.id, "stage launched");
    }

    /// Commit a finished stage's outputs.
    fn settle(&mut self, joined: Result<(TaskId, StageOutcome), JoinError>) -> Result<(), StageFailure> {
        let outcome = match joined {
            Ok((task, outcome)) => {
                self.in_flight.remove(&task);
                outcome
            }
            Err(err) => return self.lost_task(&err).map_or(Ok(()), Err),
        };

        let graph = self.graph;
        let idx = outcome.idx;
        let spec = &graph.stage_at(idx).spec;
        self.records[idx].attempts = outcome.attempts;
        self.records[idx].elapsed = Some(outcome.elapsed);

        let outputs = outcome
            .result
            .and_then(|outputs| spec.check_outputs(&outputs).map(|()| outputs))
            .map_err(|e| (idx, RunError::from_stage(spec.id.clone(), e)))?;

        for (field, value) in &outputs {
            self.store
                .put(field.clone(), value.clone(), &spec.id)
                .map_err(|e| (idx, RunError::from(e)))?;
        }

        tracing::info!(
            stage = %spec.id,
            attempts = outcome.attempts,
            elapsed_ms = millis(outcome.elapsed),
            "stage completed"
        );
        self.records[idx].outputs = outputs.clone();
        self.transition(idx, StageStatus::Completed);
        self.events.append(RunEventKind::StageCompleted {
            stage: spec.id.clone(),
            attempts: outcome.attempts,
            outputs,
        });
        Ok(())
    }

    /// A spawned task panicked or was aborted underneath us.
    ///
    /// `None` when the task id is not one this run launched.
    fn lost_task(&mut self, err: &JoinError) -> Option<StageFailure> {
        let Some(idx) = self.in_flight.remove(&err.id()) else {
            tracing::warn!(task = %err.id(), error = %err, "join error for untracked task");
            return None;
        };
        let stage = self.graph.stage_at(idx).spec.id.clone();
        Some((idx, RunError::from_stage(stage, ExecutorError::Panicked(err.to_string()))))
    }

    async fn fail_fast(&mut self, idx: usize, err: RunError, cutoff: Option<Instant>) -> RunError {
        let stage = self.graph.stage_at(idx).spec.id.clone();
        tracing::error!(%stage, error = %err, "stage failed; cancelling run");
        self.transition(idx, StageStatus::Failed);
        self.events.append(RunEventKind::StageFailed {
            stage,
            reason: err.to_string(),
        });

        self.cancel_pending();
        self.drain_in_flight(cutoff).await;
        err
    }

    /// Let in-flight stages finish within the grace period, never past the run
    /// deadline; their outputs are recorded as statuses only.
    async fn drain_in_flight(&mut self, cutoff: Option<Instant>) {
        if self.tasks.is_empty() {
            return;
        }
        let grace = cutoff.map_or(self.config.grace_period, |at| {
            self.config
                .grace_period
                .min(at.saturating_duration_since(Instant::now()))
        });
        let this = &mut *self;
        let drained = tokio::time::timeout(grace, async move {
            while let Some(joined) = this.tasks.join_next_with_id().await {
                let (idx, finished) = match joined {
                    Ok((task, outcome)) => {
                        this.in_flight.remove(&task);
                        (outcome.idx, outcome.result.is_ok())
                    }
                    Err(err) => match this.in_flight.remove(&err.id()) {
                        Some(idx) => (idx, false),
                        None => {
                            tracing::warn!(task = %err.id(), "join error for untracked task");
                            continue;
                        }
                    },
                };
                if finished {
                    this.transition(idx, StageStatus::Completed);
                } else {
                    this.transition(idx, StageStatus::Failed);
                    this.events.append(RunEventKind::StageFailed {
                        stage: this.graph.stage_at(idx).spec.id.clone(),
                        reason: "failed while run was aborting".to_string(),
                    });
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(?grace, "grace period elapsed; aborting in-flight stages");
            self.abort_in_flight();
        }
    }

    fn abort_in_flight(&mut self) {
        self.tasks.abort_all();
        self.tasks = JoinSet::new();
        for idx in std::mem::take(&mut self.in_flight).into_values() {
            self.transition(idx, StageStatus::Cancelled);
            self.events.append(RunEventKind::StageCancelled {
                stage: self.graph.stage_at(idx).spec.id.clone(),
            });
        }
    }

    fn cancel_pending(&mut self) {
        for idx in 0..self.statuses.len() {
            if self.statuses[idx] == StageStatus::Pending {
                self.transition(idx, StageStatus::Cancelled);
                self.events.append(RunEventKind::StageCancelled {
                    stage: self.graph.stage_at(idx).spec.id.clone(),
                });
            }
        }
    }

    fn transition(&mut self, idx: usize, to: StageStatus) {
        let from = self.statuses[idx];
        if let Err(err) = validate_transition(from, to) {
            tracing::error!(stage = %self.graph.stage_at(idx).spec.id, %err, "engine bug");
        }
        self.statuses[idx] = to;
        self.records[idx].status = to;
    }

    fn ids_with(&self, status: StageStatus) -> Vec<StageId> {
        self.graph
            .order_indices()
            .iter()
            .filter(|&&i| self.statuses[i] == status)
            .map(|&i| self.graph.stage_at(i).spec.id.clone())
            .collect()
    }

    fn finish(mut self, result: Result<(), RunError>, started_at: DateTime<Utc>, elapsed: Duration) -> Run {
        let (status, outputs, failure) = match result {
            Ok(()) => (RunStatus::Completed, self.store.snapshot(), None),
            Err(err) => {
                for record in &mut self.records {
                    record.outputs.clear();
                }
                (RunStatus::Failed, BTreeMap::new(), Some(err))
            }
        };
        self.events.append(RunEventKind::RunFinished { status });
        tracing::info!(%status, elapsed_ms = millis(elapsed), "run finished");

        let order: Vec<StageId> = self
            .graph
            .topological_order()
            .map(|s| s.spec.id.clone())
            .collect();
        let stages = self
            .graph
            .stages()
            .map(|s| s.spec.id.clone())
            .zip(self.records)
            .collect();

        Run {
            id: self.run_id,
            status,
            started_at,
            elapsed,
            order,
            stages,
            outputs,
            failure,
            events: self.events.into_events(),
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
